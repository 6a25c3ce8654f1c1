use uuid::Uuid;

use crate::notify::NotificationEvent;

/// what gets sent back to whoever owns the alarms
#[derive(Debug)]
pub struct Message {
    pub kind: MessageType,
    pub alarm_id: Uuid,
}

impl Message {
    #[must_use]
    pub const fn new(kind: MessageType, alarm_id: Uuid) -> Self {
        Self { kind, alarm_id }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    /// something that decides the next ring time changed, so the alarm needs rescheduling
    AlarmChanged,
    // any field changed, only worth a redraw
    PropertyChanged,
    WaitFinished,
    WaitError(String),
    /// the user acted on the ringing notification
    Notification(NotificationEvent),
}

pub type Sender = crossbeam_channel::Sender<Message>;
pub type Receiver = crossbeam_channel::Receiver<Message>;

#[must_use]
pub fn channel() -> (Sender, Receiver) {
    crossbeam_channel::unbounded()
}
