use std::{
    fmt::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLockReadGuard},
    time::{Duration, Instant},
};

use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    communication::{Message, MessageType, Sender},
    config::{Settings, SharedSettings, Sound},
    notify::{Notification, NotificationAction, NotificationEvent, Notifier},
    player::{PlaybackState, Player},
    schedule::{DaysOfWeek, Schedule},
    store::{SharedStore, ALARM_GROUP},
};

/// the persisted form of an alarm, stored as compact json
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlarmRecord {
    pub uuid: Uuid,
    pub name: String,
    pub minutes: u32,
    pub hours: u32,
    pub days_of_week: DaysOfWeek,
    pub enabled: bool,
    /// epoch seconds of the last ring, 0 if it never rang
    pub last_alarm: i64,
    pub snooze: i64,
    pub last_snooze: i64,
    pub ringtone_name: String,
    pub audio_path: PathBuf,
    pub volume: u8,
}

impl Default for AlarmRecord {
    fn default() -> Self {
        let sound = Sound::default();
        Self {
            uuid: Uuid::new_v4(),
            name: "Alarm".to_string(),
            minutes: 0,
            hours: 0,
            days_of_week: DaysOfWeek::NONE,
            enabled: true,
            last_alarm: 0,
            snooze: 0,
            last_snooze: 0,
            ringtone_name: sound.name,
            audio_path: sound.path,
            volume: 100,
        }
    }
}

impl AlarmRecord {
    /// anything that doesn't parse gives a fresh alarm with a new id, negative snooze
    /// offsets are clamped to 0
    #[must_use]
    pub fn parse(serialized: &str) -> Self {
        if serialized.trim().is_empty() {
            return Self::default();
        }
        serde_json::from_str(serialized).map_or_else(
            |e| {
                log::warn!("couldn't parse stored alarm, starting from defaults: {e}");
                Self::default()
            },
            |record: Self| Self {
                snooze: record.snooze.max(0),
                last_snooze: record.last_snooze.max(0),
                ..record
            },
        )
    }
}

/// Everything an alarm talks to besides its own sound.
#[derive(Clone)]
pub struct AlarmServices {
    pub store: SharedStore,
    pub settings: SharedSettings,
    pub notifier: Arc<dyn Notifier + Send + Sync>,
    /// where "reschedule me" and "redraw me" go, alarms without an owner keep quiet
    pub sender: Option<Sender>,
}

impl fmt::Debug for AlarmServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlarmServices")
            .field("settings", &self.settings)
            .field("has_owner", &self.sender.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RingState {
    Idle,
    Ringing {
        opened_at: Instant,
        /// the silence threshold passed and the sound was left stopped
        silenced: bool,
    },
}

/// A single alarm.
///
/// It knows when it next rings, rings itself through the notifier and its player, and
/// handles being dismissed or snoozed. The owner schedules it: whenever something that
/// moves the next ring time changes the alarm sends [`MessageType::AlarmChanged`].
pub struct Alarm {
    record: AlarmRecord,
    ring_state: RingState,
    player: Box<dyn Player>,
    services: AlarmServices,
}

impl fmt::Debug for Alarm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Alarm")
            .field("record", &self.record)
            .field("ring_state", &self.ring_state)
            .finish_non_exhaustive()
    }
}

impl Alarm {
    /// a new enabled alarm with the default ringtone
    #[must_use]
    pub fn new(
        name: String,
        hours: u32,
        minutes: u32,
        days_of_week: DaysOfWeek,
        services: AlarmServices,
        player: Box<dyn Player>,
    ) -> Self {
        let sound = read_settings(&services.settings).default_sound.clone();
        let record = AlarmRecord {
            name,
            hours,
            minutes,
            days_of_week,
            ringtone_name: sound.name,
            audio_path: sound.path,
            ..AlarmRecord::default()
        };
        let alarm = Self::from_record(record, services, player);
        alarm.emit(MessageType::AlarmChanged);
        alarm
    }

    /// an alarm as it was saved, an empty or broken entry gives a fresh default alarm
    #[must_use]
    pub fn from_serialized(
        serialized: &str,
        services: AlarmServices,
        player: Box<dyn Player>,
    ) -> Self {
        let alarm = Self::from_record(AlarmRecord::parse(serialized), services, player);
        alarm.emit(MessageType::AlarmChanged);
        alarm
    }

    #[must_use]
    pub fn from_record(
        record: AlarmRecord,
        services: AlarmServices,
        mut player: Box<dyn Player>,
    ) -> Self {
        player.set_volume(record.volume);
        player.set_media(&record.audio_path);
        Self {
            record,
            ring_state: RingState::Idle,
            player,
            services,
        }
    }

    /// every alarm in the store, `player` is called once per alarm
    #[must_use]
    pub fn load_all(
        services: &AlarmServices,
        mut player: impl FnMut() -> Box<dyn Player>,
    ) -> Vec<Self> {
        let entries = match services.store.lock() {
            Ok(store) => store.entries(ALARM_GROUP),
            Err(_) => {
                log::warn!("alarm store lock poisoned, loading no alarms");
                Vec::new()
            }
        };
        entries
            .into_iter()
            .map(|(key, serialized)| {
                let alarm = Self::from_serialized(&serialized, services.clone(), player());
                if alarm.uuid().to_string() != key {
                    log::warn!("stored alarm {key} has id {}", alarm.uuid());
                }
                alarm
            })
            .collect()
    }

    /// # Errors
    /// if the audio path isn't valid unicode
    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.record)
    }

    /// Writes the alarm to the store and syncs it.
    ///
    /// Failures are only logged, the alarm in memory stays authoritative.
    pub fn save(&self) {
        let serialized = match self.serialize() {
            Ok(serialized) => serialized,
            Err(e) => {
                log::warn!("couldn't serialize alarm {}: {e}", self.uuid());
                return;
            }
        };
        let Ok(mut store) = self.services.store.lock() else {
            log::warn!("alarm store lock poisoned, alarm {} not saved", self.uuid());
            return;
        };
        store.write_entry(ALARM_GROUP, &self.uuid().to_string(), &serialized);
        if let Err(e) = store.sync() {
            log::warn!("couldn't save alarm {}: {e}", self.uuid());
        }
    }

    /// deletes the alarm from the store
    pub fn remove(self) {
        let Ok(mut store) = self.services.store.lock() else {
            log::warn!("alarm store lock poisoned, alarm {} not removed", self.uuid());
            return;
        };
        store.delete_entry(ALARM_GROUP, &self.uuid().to_string());
        if let Err(e) = store.sync() {
            log::warn!("couldn't remove alarm {}: {e}", self.uuid());
        }
    }

    /// epoch seconds of the next ring, `None` if the alarm won't ring
    ///
    /// A ring that already went off is never due again, so asking right after
    /// [`ring`](Self::ring) gives the following occurrence.
    #[must_use]
    pub fn next_ring_time(&self) -> Option<i64> {
        let now = Local::now();
        let after_last_ring = Local
            .timestamp_opt(self.record.last_alarm.saturating_add(1), 0)
            .single()
            .map_or(now, |after| after.max(now));
        self.next_ring_time_at(&after_last_ring)
    }

    #[must_use]
    pub fn next_ring_time_at<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<i64> {
        if !self.record.enabled {
            return None;
        }
        self.schedule()
            .next_occurrence(now)
            .map(|at| at.timestamp())
    }

    #[must_use]
    pub const fn schedule(&self) -> Schedule {
        Schedule {
            hours: self.record.hours,
            minutes: self.record.minutes,
            days: self.record.days_of_week,
            snooze: self.record.snooze,
        }
    }

    /// Sends the notification and starts the ringtone.
    ///
    /// The alarm also asks to be rescheduled, an alarm nobody answers still rings at its
    /// next occurrence.
    pub fn ring(&mut self) {
        log::info!("alarm {} ({}) ringing", self.uuid(), self.record.name);
        let now = Local::now();
        let text = {
            let settings = read_settings(&self.services.settings);
            format_time(&now, &settings.time_format)
        };
        self.services.notifier.send(
            self.uuid(),
            &Notification::alarm(self.record.name.clone(), text),
        );

        self.ring_state = RingState::Ringing {
            opened_at: Instant::now(),
            silenced: false,
        };
        self.record.last_alarm = now.timestamp();
        log::debug!("alarm sound: {}", self.record.audio_path.display());
        self.play();
        self.save();
        self.emit(MessageType::AlarmChanged);
        self.emit(MessageType::PropertyChanged);
    }

    #[must_use]
    pub const fn is_ringing(&self) -> bool {
        matches!(self.ring_state, RingState::Ringing { .. })
    }

    /// Checks the player and restarts the ringtone if it ended on its own.
    ///
    /// Meant to be called regularly by the owner while the alarm rings.
    pub fn poll_playback(&mut self) {
        let state = self.player.state();
        self.on_playback_state(state);
    }

    /// for players that report their state changes
    pub fn on_playback_state(&mut self, state: PlaybackState) {
        self.loop_alarm_sound(state, Instant::now());
    }

    fn loop_alarm_sound(&mut self, state: PlaybackState, now: Instant) {
        let RingState::Ringing {
            opened_at,
            silenced: false,
        } = self.ring_state
        else {
            return;
        };
        if state != PlaybackState::Stopped {
            return;
        }
        let silence_after =
            Duration::from_secs(read_settings(&self.services.settings).silence_after);
        if now.saturating_duration_since(opened_at).as_secs() <= silence_after.as_secs() {
            self.play();
        } else {
            log::info!("alarm {} silenced after {silence_after:?}", self.uuid());
            self.ring_state = RingState::Ringing {
                opened_at,
                silenced: true,
            };
        }
    }

    fn play(&mut self) {
        if let Err(e) = self.player.play() {
            log::warn!("couldn't play alarm sound for {}: {e}", self.uuid());
        }
    }

    /// Routes what the user did with the notification.
    ///
    /// Clicking it, dismissing it or closing it dismisses the alarm. Events that arrive
    /// when the alarm isn't ringing, like the close that follows a snooze, are ignored.
    pub fn handle_notification(&mut self, event: NotificationEvent) {
        if !self.is_ringing() {
            log::debug!("alarm {} not ringing, ignoring {event:?}", self.uuid());
            return;
        }
        match event {
            NotificationEvent::Action(NotificationAction::Snooze) => self.handle_snooze(),
            NotificationEvent::Action(NotificationAction::Dismiss)
            | NotificationEvent::DefaultActivated
            | NotificationEvent::Closed => self.handle_dismiss(),
        }
    }

    pub fn handle_dismiss(&mut self) {
        log::info!("alarm {} dismissed", self.uuid());
        self.ring_state = RingState::Idle;
        self.player.stop();

        self.record.snooze = 0;
        self.record.last_snooze = 0;
        self.save();
        self.emit(MessageType::AlarmChanged);
        self.emit(MessageType::PropertyChanged);
    }

    pub fn handle_snooze(&mut self) {
        let snooze_length = read_settings(&self.services.settings).snooze_length;
        log::info!(
            "alarm {} snoozed ({snooze_length} minutes), already snoozed {}s",
            self.uuid(),
            self.record.last_snooze
        );
        self.ring_state = RingState::Idle;
        self.player.stop();

        self.record.snooze = self.record.last_snooze + 60 * i64::from(snooze_length);
        self.record.last_snooze = self.record.snooze;
        self.record.enabled = true;
        self.save();
        self.emit(MessageType::AlarmChanged);
        self.emit(MessageType::PropertyChanged);
    }

    fn emit(&self, kind: MessageType) {
        if let Some(sender) = &self.services.sender {
            if sender.send(Message::new(kind, self.uuid())).is_err() {
                log::debug!("owner of alarm {} is gone", self.uuid());
            }
        }
    }

    fn set_schedule_field<T: PartialEq>(
        &mut self,
        value: T,
        field: fn(&mut AlarmRecord) -> &mut T,
    ) {
        let slot = field(&mut self.record);
        if *slot != value {
            *slot = value;
            self.emit(MessageType::AlarmChanged);
            self.emit(MessageType::PropertyChanged);
        }
    }

    fn set_property<T: PartialEq>(&mut self, value: T, field: fn(&mut AlarmRecord) -> &mut T) {
        let slot = field(&mut self.record);
        if *slot != value {
            *slot = value;
            self.emit(MessageType::PropertyChanged);
        }
    }

    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.record.uuid
    }

    #[must_use]
    pub const fn record(&self) -> &AlarmRecord {
        &self.record
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn set_name(&mut self, name: String) {
        self.set_property(name, |r| &mut r.name);
    }

    #[must_use]
    pub const fn hours(&self) -> u32 {
        self.record.hours
    }

    pub fn set_hours(&mut self, hours: u32) {
        self.set_schedule_field(hours, |r| &mut r.hours);
    }

    #[must_use]
    pub const fn minutes(&self) -> u32 {
        self.record.minutes
    }

    pub fn set_minutes(&mut self, minutes: u32) {
        self.set_schedule_field(minutes, |r| &mut r.minutes);
    }

    #[must_use]
    pub const fn days_of_week(&self) -> DaysOfWeek {
        self.record.days_of_week
    }

    pub fn set_days_of_week(&mut self, days: DaysOfWeek) {
        self.set_schedule_field(days, |r| &mut r.days_of_week);
    }

    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.record.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.set_schedule_field(enabled, |r| &mut r.enabled);
    }

    /// seconds added to the alarm time
    #[must_use]
    pub const fn snooze(&self) -> i64 {
        self.record.snooze
    }

    /// negative offsets are clamped to 0
    pub fn set_snooze(&mut self, snooze: i64) {
        self.set_schedule_field(snooze.max(0), |r| &mut r.snooze);
    }

    #[must_use]
    pub const fn last_snooze(&self) -> i64 {
        self.record.last_snooze
    }

    #[must_use]
    pub const fn last_alarm(&self) -> i64 {
        self.record.last_alarm
    }

    #[must_use]
    pub fn ringtone_name(&self) -> &str {
        &self.record.ringtone_name
    }

    #[must_use]
    pub fn audio_path(&self) -> &Path {
        &self.record.audio_path
    }

    pub fn set_ringtone(&mut self, sound: Sound) {
        self.player.set_media(&sound.path);
        self.set_property(sound.name, |r| &mut r.ringtone_name);
        self.set_property(sound.path, |r| &mut r.audio_path);
    }

    #[must_use]
    pub const fn volume(&self) -> u8 {
        self.record.volume
    }

    pub fn set_volume(&mut self, volume: u8) {
        let volume = volume.min(100);
        self.player.set_volume(volume);
        self.set_property(volume, |r| &mut r.volume);
    }
}

impl Drop for Alarm {
    fn drop(&mut self) {
        if self.is_ringing() {
            self.player.stop();
        }
    }
}

fn read_settings(settings: &SharedSettings) -> RwLockReadGuard<'_, Settings> {
    settings.read().unwrap_or_else(PoisonError::into_inner)
}

fn format_time<Tz: TimeZone>(at: &DateTime<Tz>, format: &str) -> String
where
    Tz::Offset: fmt::Display,
{
    let mut text = String::new();
    // chrono reports a bad format string as a formatting error
    if write!(text, "{}", at.format(format)).is_err() {
        log::warn!("bad time format `{format}`, using 24 hour time");
        text.clear();
        if let Err(e) = write!(text, "{}", at.format("%H:%M")) {
            log::warn!("couldn't format the ring time: {e}");
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex, RwLock};

    use chrono::{Datelike, Utc, Weekday};

    use super::*;
    use crate::{
        communication::{self, Receiver},
        error::PlaybackError,
        store::{ConfigStore, MemoryStore},
    };

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Media(PathBuf),
        Volume(u8),
        Play,
        Stop,
    }

    #[derive(Clone, Default)]
    struct FakePlayer {
        calls: Arc<Mutex<Vec<Call>>>,
        state: Arc<Mutex<Option<PlaybackState>>>,
    }

    impl FakePlayer {
        fn plays(&self) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|call| **call == Call::Play)
                .count()
        }

        fn last(&self) -> Option<Call> {
            self.calls.lock().unwrap().last().cloned()
        }

        fn finish_track(&self) {
            *self.state.lock().unwrap() = Some(PlaybackState::Stopped);
        }
    }

    impl Player for FakePlayer {
        fn set_media(&mut self, path: &Path) {
            self.calls.lock().unwrap().push(Call::Media(path.to_path_buf()));
        }

        fn set_volume(&mut self, volume: u8) {
            self.calls.lock().unwrap().push(Call::Volume(volume));
        }

        fn play(&mut self) -> Result<(), PlaybackError> {
            self.calls.lock().unwrap().push(Call::Play);
            *self.state.lock().unwrap() = Some(PlaybackState::Playing);
            Ok(())
        }

        fn stop(&mut self) {
            self.calls.lock().unwrap().push(Call::Stop);
            *self.state.lock().unwrap() = Some(PlaybackState::Stopped);
        }

        fn state(&self) -> PlaybackState {
            self.state.lock().unwrap().unwrap_or(PlaybackState::Stopped)
        }
    }

    #[derive(Default)]
    struct FakeNotifier {
        sent: Mutex<Vec<(Uuid, Notification)>>,
    }

    impl Notifier for FakeNotifier {
        fn send(&self, alarm_id: Uuid, notification: &Notification) {
            self.sent
                .lock()
                .unwrap()
                .push((alarm_id, notification.clone()));
        }
    }

    struct Harness {
        services: AlarmServices,
        store: Arc<Mutex<MemoryStore>>,
        notifier: Arc<FakeNotifier>,
        player: FakePlayer,
        messages: Receiver,
    }

    fn harness() -> Harness {
        let (sender, messages) = communication::channel();
        let store = Arc::new(Mutex::new(MemoryStore::new()));
        let notifier = Arc::new(FakeNotifier::default());
        let settings = Settings {
            snooze_length: 5,
            silence_after: 60,
            ..Settings::default()
        };
        Harness {
            services: AlarmServices {
                store: store.clone(),
                settings: Arc::new(RwLock::new(settings)),
                notifier: notifier.clone(),
                sender: Some(sender),
            },
            store,
            notifier,
            player: FakePlayer::default(),
            messages,
        }
    }

    impl Harness {
        fn alarm(&self, hours: u32, minutes: u32, days: DaysOfWeek) -> Alarm {
            Alarm::new(
                "wake up".to_string(),
                hours,
                minutes,
                days,
                self.services.clone(),
                Box::new(self.player.clone()),
            )
        }

        fn drain(&self) -> Vec<MessageType> {
            self.messages.try_iter().map(|message| message.kind).collect()
        }
    }

    fn at(h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, h, mi, 0).unwrap()
    }

    #[test]
    fn new_alarm_defaults() {
        let h = harness();
        let alarm = h.alarm(7, 30, DaysOfWeek::NONE);
        assert!(alarm.enabled());
        assert_eq!(alarm.snooze(), 0);
        assert_eq!(alarm.last_snooze(), 0);
        assert_eq!(alarm.volume(), 100);
        assert_eq!(alarm.ringtone_name(), Sound::default().name);
        assert_eq!(h.drain(), vec![MessageType::AlarmChanged]);
    }

    #[test]
    fn disabled_alarm_never_rings() {
        let h = harness();
        let mut alarm = h.alarm(9, 0, DaysOfWeek::EVERY_DAY);
        alarm.set_enabled(false);
        assert_eq!(alarm.next_ring_time_at(&at(8, 0)), None);
        assert_eq!(alarm.next_ring_time_at(&at(10, 0)), None);
    }

    #[test]
    fn one_shot_rings_later_today_only() {
        let h = harness();
        let alarm = h.alarm(9, 0, DaysOfWeek::NONE);
        assert_eq!(alarm.next_ring_time_at(&at(8, 0)), Some(at(9, 0).timestamp()));
        assert_eq!(alarm.next_ring_time_at(&at(9, 1)), None);
    }

    #[test]
    fn single_weekday_alarm_rings_on_that_weekday() {
        let h = harness();
        let alarm = h.alarm(6, 45, DaysOfWeek::NONE.with(Weekday::Sun));
        let next = alarm.next_ring_time_at(&at(12, 0)).unwrap();
        let next = DateTime::from_timestamp(next, 0).unwrap();
        assert_eq!(next.weekday(), Weekday::Sun);
        assert!(next > at(12, 0));
    }

    #[test]
    fn ring_notifies_and_plays() {
        let h = harness();
        let mut alarm = h.alarm(7, 0, DaysOfWeek::NONE);
        h.drain();
        alarm.ring();

        assert!(alarm.is_ringing());
        assert_eq!(h.player.last(), Some(Call::Play));
        assert!(alarm.last_alarm() > 0);
        let sent = h.notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, alarm.uuid());
        assert_eq!(sent[0].1.title, "wake up");
        assert_eq!(
            sent[0].1.actions,
            vec![NotificationAction::Dismiss, NotificationAction::Snooze]
        );
        assert_eq!(
            h.drain(),
            vec![MessageType::AlarmChanged, MessageType::PropertyChanged]
        );
    }

    #[test]
    fn unanswered_repeating_alarm_moves_on_to_its_next_day() {
        let h = harness();
        let mut alarm = h.alarm(7, 0, DaysOfWeek::EVERY_DAY);
        let due = alarm.next_ring_time().unwrap();
        // as if the ring went off right at the deadline
        alarm.record.last_alarm = due;

        let next = alarm.next_ring_time().unwrap();
        assert!(next > due);
        assert!(next - due >= 23 * 3600);
    }

    #[test]
    fn snooze_adds_the_snooze_length_every_time() {
        let h = harness();
        let mut alarm = h.alarm(7, 0, DaysOfWeek::NONE);
        alarm.set_enabled(false);
        h.drain();

        alarm.ring();
        alarm.handle_notification(NotificationEvent::Action(NotificationAction::Snooze));
        assert!(!alarm.is_ringing());
        assert_eq!(h.player.last(), Some(Call::Stop));
        assert_eq!(alarm.last_snooze(), 300);
        assert_eq!(alarm.snooze(), 300);
        assert!(alarm.enabled());

        alarm.ring();
        alarm.handle_snooze();
        assert_eq!(alarm.last_snooze(), 600);
        assert_eq!(alarm.snooze(), 600);

        let kinds = h.drain();
        assert!(kinds.contains(&MessageType::AlarmChanged));
        assert!(kinds.contains(&MessageType::PropertyChanged));
    }

    #[test]
    fn snoozed_alarm_rings_after_the_snooze() {
        let h = harness();
        let mut alarm = h.alarm(7, 0, DaysOfWeek::NONE);
        alarm.ring();
        alarm.handle_snooze();
        assert_eq!(
            alarm.next_ring_time_at(&at(7, 1)),
            Some(at(7, 5).timestamp())
        );
    }

    #[test]
    fn dismiss_resets_snooze() {
        let h = harness();
        let mut alarm = h.alarm(7, 0, DaysOfWeek::NONE);
        alarm.ring();
        alarm.handle_snooze();
        alarm.ring();
        h.drain();
        alarm.handle_notification(NotificationEvent::Action(NotificationAction::Dismiss));

        assert!(!alarm.is_ringing());
        assert_eq!(alarm.snooze(), 0);
        assert_eq!(alarm.last_snooze(), 0);
        assert_eq!(h.player.last(), Some(Call::Stop));
        assert_eq!(
            h.drain(),
            vec![MessageType::AlarmChanged, MessageType::PropertyChanged]
        );
    }

    #[test]
    fn close_after_snooze_keeps_the_snooze() {
        let h = harness();
        let mut alarm = h.alarm(7, 0, DaysOfWeek::NONE);
        alarm.ring();
        alarm.handle_notification(NotificationEvent::Action(NotificationAction::Snooze));
        alarm.handle_notification(NotificationEvent::Closed);
        assert_eq!(alarm.snooze(), 300);
    }

    #[test]
    fn closing_or_clicking_the_notification_dismisses() {
        for event in [NotificationEvent::Closed, NotificationEvent::DefaultActivated] {
            let h = harness();
            let mut alarm = h.alarm(7, 0, DaysOfWeek::NONE);
            alarm.ring();
            alarm.handle_snooze();
            alarm.ring();
            alarm.handle_notification(event);
            assert!(!alarm.is_ringing());
            assert_eq!(alarm.last_snooze(), 0);
        }
    }

    #[test]
    fn sound_loops_until_the_silence_threshold() {
        let h = harness();
        let mut alarm = h.alarm(7, 0, DaysOfWeek::NONE);
        alarm.ring();
        assert_eq!(h.player.plays(), 1);

        h.player.finish_track();
        alarm.poll_playback();
        assert_eq!(h.player.plays(), 2);

        // still playing, nothing to restart
        alarm.poll_playback();
        assert_eq!(h.player.plays(), 2);

        let RingState::Ringing { opened_at, .. } = alarm.ring_state else {
            panic!("alarm should be ringing");
        };
        h.player.finish_track();
        alarm.loop_alarm_sound(PlaybackState::Stopped, opened_at + Duration::from_secs(61));
        assert_eq!(h.player.plays(), 2);
        assert!(alarm.is_ringing());

        // once silenced it stays silent
        alarm.loop_alarm_sound(PlaybackState::Stopped, opened_at + Duration::from_secs(1));
        assert_eq!(h.player.plays(), 2);
    }

    #[test]
    fn idle_alarm_doesnt_loop() {
        let h = harness();
        let mut alarm = h.alarm(7, 0, DaysOfWeek::NONE);
        alarm.on_playback_state(PlaybackState::Stopped);
        assert_eq!(h.player.plays(), 0);
    }

    #[test]
    fn save_writes_compact_json_under_the_uuid() {
        let h = harness();
        let alarm = h.alarm(7, 5, DaysOfWeek::WEEKDAYS);
        alarm.save();

        let store = h.store.lock().unwrap();
        let stored = store
            .read_entry(ALARM_GROUP, &alarm.uuid().to_string())
            .unwrap();
        assert!(!stored.contains('\n'));
        let json: serde_json::Value = serde_json::from_str(&stored).unwrap();
        for key in [
            "uuid",
            "name",
            "minutes",
            "hours",
            "daysOfWeek",
            "enabled",
            "lastAlarm",
            "snooze",
            "lastSnooze",
            "ringtoneName",
            "audioPath",
            "volume",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["daysOfWeek"], 31);
        assert_eq!(json["minutes"], 5);
    }

    #[test]
    fn serialized_alarm_comes_back_the_same() {
        let h = harness();
        let mut alarm = h.alarm(22, 15, DaysOfWeek::WEEKEND);
        alarm.set_volume(40);
        alarm.set_ringtone(Sound::new("rain".to_string(), PathBuf::from("/sounds/rain.mp3")));
        alarm.ring();
        alarm.handle_snooze();

        let serialized = alarm.serialize().unwrap();
        let restored = Alarm::from_serialized(
            &serialized,
            h.services.clone(),
            Box::new(FakePlayer::default()),
        );
        assert_eq!(restored.record(), alarm.record());
    }

    #[test]
    fn empty_or_broken_entries_give_fresh_alarms() {
        let h = harness();
        let empty = Alarm::from_serialized("", h.services.clone(), Box::new(FakePlayer::default()));
        let broken = Alarm::from_serialized(
            "{not json",
            h.services.clone(),
            Box::new(FakePlayer::default()),
        );
        assert_ne!(empty.uuid(), broken.uuid());
        assert!(empty.enabled());
        assert_eq!(empty.snooze(), 0);
        assert_eq!(broken.hours(), 0);
    }

    #[test]
    fn negative_stored_snooze_is_clamped() {
        let record = AlarmRecord::parse(r#"{"snooze":-300,"lastSnooze":-600,"hours":7}"#);
        assert_eq!(record.snooze, 0);
        assert_eq!(record.last_snooze, 0);
        assert_eq!(record.hours, 7);
    }

    #[test]
    fn save_and_remove_sync_the_store() {
        let h = harness();
        let alarm = h.alarm(7, 0, DaysOfWeek::NONE);
        alarm.save();
        assert_eq!(h.store.lock().unwrap().sync_count(), 1);
        alarm.remove();
        assert_eq!(h.store.lock().unwrap().sync_count(), 2);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let record = AlarmRecord::parse(r#"{"name":"tea","hours":16}"#);
        assert_eq!(record.name, "tea");
        assert_eq!(record.hours, 16);
        assert_eq!(record.minutes, 0);
        assert!(record.enabled);
    }

    #[test]
    fn remove_deletes_the_entry() {
        let h = harness();
        let alarm = h.alarm(7, 0, DaysOfWeek::NONE);
        let key = alarm.uuid().to_string();
        alarm.save();
        alarm.remove();
        assert_eq!(h.store.lock().unwrap().read_entry(ALARM_GROUP, &key), None);
    }

    #[test]
    fn load_all_reads_every_saved_alarm() {
        let h = harness();
        let first = h.alarm(7, 0, DaysOfWeek::NONE);
        let second = h.alarm(8, 0, DaysOfWeek::NONE);
        first.save();
        second.save();

        let mut loaded = Alarm::load_all(&h.services, || Box::new(FakePlayer::default()));
        loaded.sort_by_key(Alarm::hours);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].record(), first.record());
        assert_eq!(loaded[1].record(), second.record());
    }

    #[test]
    fn only_schedule_changes_ask_for_rescheduling() {
        let h = harness();
        let mut alarm = h.alarm(7, 0, DaysOfWeek::NONE);
        h.drain();

        alarm.set_name("tea".to_string());
        alarm.set_volume(20);
        assert_eq!(
            h.drain(),
            vec![MessageType::PropertyChanged, MessageType::PropertyChanged]
        );

        alarm.set_hours(8);
        assert_eq!(
            h.drain(),
            vec![MessageType::AlarmChanged, MessageType::PropertyChanged]
        );

        // unchanged values are not reported
        alarm.set_hours(8);
        assert!(h.drain().is_empty());
    }

    #[test]
    fn format_time_survives_a_bad_format() {
        assert_eq!(format_time(&at(7, 5), "%H:%M"), "07:05");
        assert_eq!(format_time(&at(7, 5), "%Q"), "07:05");
    }
}
