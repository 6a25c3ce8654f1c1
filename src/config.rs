use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

const APP_NAME: &str = "roosty_alarm";

/// user settings that the alarms read when they ring, snooze or get dismissed
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// how long a snooze lasts, in minutes
    pub snooze_length: u32,
    /// an unattended alarm stops looping its sound after this many seconds
    pub silence_after: u64,
    pub time_format: String,
    pub default_sound: Sound,
}

/// settings shared between the owner and every alarm
pub type SharedSettings = Arc<RwLock<Settings>>;

impl Default for Settings {
    fn default() -> Self {
        Self {
            snooze_length: 5,
            silence_after: 300,
            time_format: "%l:%M %p".to_string(),
            default_sound: Sound::default(),
        }
    }
}

impl Settings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn shared(self) -> SharedSettings {
        Arc::new(RwLock::new(self))
    }

    /// # Errors
    /// if the file can't be read or isn't valid settings
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let settings = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&settings).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// like [`Self::load`] but a missing file gives the defaults
    ///
    /// # Errors
    /// if the file exists but can't be read or parsed
    pub fn load_or_default(path: &Path) -> Result<Self, SettingsError> {
        if path.exists() {
            Self::load(path)
        } else {
            log::debug!("no settings at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// # Errors
    /// if the settings can't be serialized or written
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let settings = toml::to_string(self)?;
        let write_err = |source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        std::fs::write(path, settings).map_err(write_err)
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APP_NAME)
}

/// # Errors
/// if there is no home directory to put the config in
pub fn config_path() -> Result<PathBuf, SettingsError> {
    let dirs = project_dirs().ok_or(SettingsError::NoProjectDirs)?;
    Ok(dirs.config_dir().join("config.toml"))
}

/// where the alarms are stored
///
/// # Errors
/// if there is no home directory to put the config in
pub fn alarms_path() -> Result<PathBuf, SettingsError> {
    let dirs = project_dirs().ok_or(SettingsError::NoProjectDirs)?;
    Ok(dirs.config_dir().join("alarms.toml"))
}

#[must_use]
pub fn sounds_path() -> PathBuf {
    project_dirs().map_or_else(
        || PathBuf::from("sounds"),
        |dirs| dirs.data_dir().join("sounds"),
    )
}

#[must_use]
pub fn is_config_present() -> bool {
    config_path().is_ok_and(|path| path.exists())
}

/// a ringtone
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Sound {
    pub name: String,
    pub path: PathBuf,
}

impl fmt::Display for Sound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.path.file_name() {
            Some(file) => write!(f, "{}:{}", self.name, file.to_string_lossy()),
            None => write!(f, "{}", self.name),
        }
    }
}

impl Default for Sound {
    fn default() -> Self {
        Self::beep_beep()
    }
}

impl Sound {
    #[must_use]
    pub const fn new(name: String, path: PathBuf) -> Self {
        Self { name, path }
    }

    #[must_use]
    pub fn beep_beep() -> Self {
        Self {
            name: "beep beep".to_string(),
            path: sounds_path().join("beep_beep.mp3"),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_take_defaults() {
        let settings: Settings = toml::from_str("snooze_length = 10").unwrap();
        assert_eq!(settings.snooze_length, 10);
        assert_eq!(settings.silence_after, 300);
        assert_eq!(settings.time_format, "%l:%M %p");
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let settings = Settings {
            snooze_length: 9,
            silence_after: 42,
            time_format: "%H:%M".to_string(),
            default_sound: Sound::new("ring".to_string(), PathBuf::from("/tmp/ring.mp3")),
        };
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn missing_file_is_default_but_broken_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert_eq!(Settings::load_or_default(&path).unwrap(), Settings::default());
        std::fs::write(&path, "snooze_length = \"soon\"").unwrap();
        assert!(matches!(
            Settings::load_or_default(&path),
            Err(SettingsError::Parse { .. })
        ));
    }

    #[test]
    fn sound_display_shows_file_name() {
        let sound = Sound::new("ring".to_string(), PathBuf::from("/sounds/ring.mp3"));
        assert_eq!(sound.to_string(), "ring:ring.mp3");
    }
}
