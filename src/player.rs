use std::path::{Path, PathBuf};

use crate::error::PlaybackError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Playing,
    Stopped,
}

/// Plays a ringtone.
///
/// `play` plays the media once, the alarm restarts it while it is still ringing
/// so that an unattended alarm goes quiet after the silence threshold.
pub trait Player {
    fn set_media(&mut self, path: &Path);
    /// 0 to 100
    fn set_volume(&mut self, volume: u8);
    /// # Errors
    /// if the media can't be opened or decoded
    fn play(&mut self) -> Result<(), PlaybackError>;
    fn stop(&mut self);
    fn state(&self) -> PlaybackState;
}

/// player for headless setups, it "plays" until told to stop
#[derive(Debug, Default)]
pub struct SilentPlayer {
    media: Option<PathBuf>,
    playing: bool,
}

impl Player for SilentPlayer {
    fn set_media(&mut self, path: &Path) {
        self.media = Some(path.to_path_buf());
    }

    fn set_volume(&mut self, _volume: u8) {}

    fn play(&mut self) -> Result<(), PlaybackError> {
        log::debug!("silently playing {:?}", self.media);
        self.playing = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.playing = false;
    }

    fn state(&self) -> PlaybackState {
        if self.playing {
            PlaybackState::Playing
        } else {
            PlaybackState::Stopped
        }
    }
}

#[cfg(feature = "audio")]
pub use rodio_player::RodioPlayer;

#[cfg(feature = "audio")]
mod rodio_player {
    use std::{
        fs::File,
        io::BufReader,
        path::{Path, PathBuf},
    };

    use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink};

    use super::{PlaybackState, Player};
    use crate::error::PlaybackError;

    pub struct RodioPlayer {
        stream: OutputStream,
        sink: Option<Sink>,
        media: Option<PathBuf>,
        volume: f32,
    }

    impl RodioPlayer {
        /// # Errors
        /// if there is no usable audio output device
        pub fn open_default() -> Result<Self, PlaybackError> {
            let stream = OutputStreamBuilder::open_default_stream()
                .map_err(|e| PlaybackError::Backend(e.to_string()))?;
            Ok(Self {
                stream,
                sink: None,
                media: None,
                volume: 1.0,
            })
        }
    }

    impl Player for RodioPlayer {
        fn set_media(&mut self, path: &Path) {
            self.media = Some(path.to_path_buf());
        }

        fn set_volume(&mut self, volume: u8) {
            self.volume = f32::from(volume.min(100)) / 100.0;
            if let Some(sink) = &self.sink {
                sink.set_volume(self.volume);
            }
        }

        fn play(&mut self) -> Result<(), PlaybackError> {
            let path = self.media.as_ref().ok_or(PlaybackError::NoMedia)?;
            let file = File::open(path).map_err(|source| PlaybackError::Open {
                path: path.clone(),
                source,
            })?;
            let source = Decoder::new(BufReader::new(file))
                .map_err(|e| PlaybackError::Backend(e.to_string()))?;
            self.stop();
            let sink = Sink::connect_new(self.stream.mixer());
            sink.set_volume(self.volume);
            sink.append(source);
            sink.play();
            self.sink = Some(sink);
            Ok(())
        }

        fn stop(&mut self) {
            if let Some(sink) = self.sink.take() {
                sink.stop();
            }
        }

        fn state(&self) -> PlaybackState {
            match &self.sink {
                Some(sink) if !sink.empty() => PlaybackState::Playing,
                _ => PlaybackState::Stopped,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_player_plays_until_stopped() {
        let mut player = SilentPlayer::default();
        assert_eq!(player.state(), PlaybackState::Stopped);
        player.set_media(Path::new("beep_beep.mp3"));
        player.play().unwrap();
        assert_eq!(player.state(), PlaybackState::Playing);
        player.stop();
        assert_eq!(player.state(), PlaybackState::Stopped);
    }
}
