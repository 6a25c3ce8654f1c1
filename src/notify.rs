use std::fmt;

use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
    Dismiss,
    Snooze,
}

impl fmt::Display for NotificationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dismiss => write!(f, "Dismiss"),
            Self::Snooze => write!(f, "Snooze"),
        }
    }
}

/// what the notification reports back to the alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationEvent {
    /// the notification body was clicked
    DefaultActivated,
    Action(NotificationAction),
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub text: String,
    pub icon: String,
    pub actions: Vec<NotificationAction>,
    /// shown with high urgency
    pub urgent: bool,
    /// stays on screen until acted on
    pub persistent: bool,
}

impl Notification {
    #[must_use]
    pub fn alarm(title: String, text: String) -> Self {
        Self {
            title,
            text,
            icon: "alarm-clock".to_string(),
            actions: vec![NotificationAction::Dismiss, NotificationAction::Snooze],
            urgent: true,
            persistent: true,
        }
    }
}

/// Shows alarm notifications.
///
/// Implementations deliver the user's response back through
/// [`Alarm::handle_notification`](crate::alarm::Alarm::handle_notification),
/// usually by sending a [`MessageType::Notification`](crate::communication::MessageType::Notification)
/// to the owner of the alarm.
pub trait Notifier {
    fn send(&self, alarm_id: Uuid, notification: &Notification);
}

/// notifier that only writes to the log, the owner has to collect dismiss/snooze itself
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, alarm_id: Uuid, notification: &Notification) {
        let actions: Vec<String> = notification
            .actions
            .iter()
            .map(ToString::to_string)
            .collect();
        let level = if notification.urgent {
            log::Level::Warn
        } else {
            log::Level::Info
        };
        log::log!(
            level,
            "alarm {alarm_id} ringing: {} ({}) [{}]",
            notification.title,
            notification.text.trim(),
            actions.join("/")
        );
    }
}
