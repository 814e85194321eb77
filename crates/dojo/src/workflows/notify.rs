use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Outbound hook towards the notification service (e-mail, SMS, in-app).
pub trait NotificationPublisher: Send + Sync {
    fn publish(&self, notification: Notification) -> Result<(), NotificationError>;
}

/// Event payload; templating happens on the consumer side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub template: String,
    pub subject_id: String,
    pub details: BTreeMap<String, String>,
}

impl Notification {
    pub fn new(template: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            subject_id: subject_id.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Fire-and-forget: delivery failures are logged, never surfaced to the caller.
pub(crate) fn dispatch<N>(publisher: &N, notification: Notification)
where
    N: NotificationPublisher + ?Sized,
{
    let template = notification.template.clone();
    let subject = notification.subject_id.clone();
    if let Err(err) = publisher.publish(notification) {
        warn!(%template, %subject, error = %err, "notification dropped");
    }
}

/// Publisher that writes each event to the log and retains nothing; backs the server.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

impl NotificationPublisher for LoggingNotifier {
    fn publish(&self, notification: Notification) -> Result<(), NotificationError> {
        info!(
            template = %notification.template,
            subject = %notification.subject_id,
            details = ?notification.details,
            "notification published"
        );
        Ok(())
    }
}

/// Publisher that keeps every event in memory; backs the demo walkthrough and tests.
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<Notification> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn templates(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .map(|event| event.template)
            .collect()
    }
}

impl NotificationPublisher for RecordingNotifier {
    fn publish(&self, notification: Notification) -> Result<(), NotificationError> {
        self.events
            .lock()
            .map_err(|_| NotificationError::Transport("recorder mutex poisoned".to_string()))?
            .push(notification);
        Ok(())
    }
}
