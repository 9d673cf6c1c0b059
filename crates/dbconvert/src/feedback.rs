//! Progress and diagnostic events, delivered to any number of subscribers.
//!
//! The [`FeedbackHub`] is the only channel between a running conversion and
//! its observers. Every subscriber owns an unbounded queue fed under one lock,
//! so each one sees events in emission order and a slow subscriber never
//! blocks the run. Events published before a subscriber attaches are replayed
//! to it, which lets callers subscribe after starting a conversion without
//! missing anything.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::{LogLevel, LoggingConfig};
use crate::error::ConvertError;

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A timestamped progress or diagnostic message.
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackEvent {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
    /// Whether an interactive shell may hide the event without losing
    /// anything the operator must act on.
    pub ignorable: bool,
    /// Object the event is about, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
}

impl FeedbackEvent {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            message: message.into(),
            ignorable: severity == Severity::Info,
            object: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    /// Event describing a caught failure. Recoverable failures are warnings.
    pub fn from_error(err: &ConvertError) -> Self {
        let severity = match err {
            ConvertError::TransactionRollback { .. } => Severity::Error,
            e if e.is_recoverable() => Severity::Warning,
            _ => Severity::Error,
        };
        Self::new(severity, err.to_string())
    }

    pub fn with_object(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }

    /// Override the severity. Anything above `Info` must be seen.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        if severity > Severity::Info {
            self.ignorable = false;
        }
        self
    }

    pub fn with_ignorable(mut self, ignorable: bool) -> Self {
        self.ignorable = ignorable;
        self
    }
}

#[derive(Default)]
struct HubInner {
    history: Vec<FeedbackEvent>,
    subscribers: Vec<mpsc::UnboundedSender<FeedbackEvent>>,
    warnings: usize,
    errors: usize,
    closed: bool,
}

/// Publish/subscribe hub for one conversion run.
pub struct FeedbackHub {
    inner: Mutex<HubInner>,
    logging: LoggingConfig,
}

impl FeedbackHub {
    pub fn new(logging: LoggingConfig) -> Self {
        Self {
            inner: Mutex::new(HubInner::default()),
            logging,
        }
    }

    /// Publish an event to every subscriber and mirror it into the log.
    pub fn publish(&self, event: FeedbackEvent) {
        self.mirror(&event);

        let mut inner = self.inner.lock();
        match event.severity {
            Severity::Warning => inner.warnings += 1,
            Severity::Error => inner.errors += 1,
            Severity::Info => {}
        }
        // Subscribers whose receiver was dropped are forgotten.
        inner.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        inner.history.push(event);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.publish(FeedbackEvent::info(message));
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.publish(FeedbackEvent::warning(message));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.publish(FeedbackEvent::error(message));
    }

    /// Publish a caught failure.
    pub fn report(&self, err: &ConvertError) {
        self.publish(FeedbackEvent::from_error(err));
    }

    /// Attach a subscriber. Past events are replayed first.
    ///
    /// The stream ends once the run has finished and the hub is closed.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<FeedbackEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        for event in &inner.history {
            // The receiver is alive: it is returned below.
            let _ = tx.send(event.clone());
        }
        if !inner.closed {
            inner.subscribers.push(tx);
        }
        rx
    }

    /// End every subscriber stream. Later events are still recorded.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.subscribers.clear();
    }

    /// All events published so far.
    pub fn events(&self) -> Vec<FeedbackEvent> {
        self.inner.lock().history.clone()
    }

    /// `(warnings, errors)` published so far.
    pub fn counts(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.warnings, inner.errors)
    }

    fn mirror(&self, event: &FeedbackEvent) {
        if !self.logging.enabled {
            return;
        }
        let object = event.object.as_deref().unwrap_or("");
        match event.severity {
            Severity::Info if self.logging.level == LogLevel::Info => {
                info!(object, "{}", event.message)
            }
            Severity::Info => {}
            Severity::Warning => warn!(object, "{}", event.message),
            Severity::Error => error!(object, "{}", event.message),
        }
    }
}

impl Default for FeedbackHub {
    fn default() -> Self {
        Self::new(LoggingConfig::default())
    }
}

impl std::fmt::Debug for FeedbackHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("FeedbackHub")
            .field("events", &inner.history.len())
            .field("subscribers", &inner.subscribers.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delivery_order_and_replay() {
        let hub = FeedbackHub::default();
        hub.info("first");
        let mut early = hub.subscribe();
        hub.warning("second");
        let mut late = hub.subscribe();
        hub.error("third");
        hub.close();

        for rx in [&mut early, &mut late] {
            let mut messages = Vec::new();
            while let Some(event) = rx.recv().await {
                messages.push(event.message);
            }
            assert_eq!(messages, vec!["first", "second", "third"]);
        }
        assert_eq!(hub.counts(), (1, 1));
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_forgotten() {
        let hub = FeedbackHub::default();
        let rx = hub.subscribe();
        drop(rx);
        hub.info("nobody listens");
        assert_eq!(hub.events().len(), 1);
        assert!(format!("{:?}", hub).contains("subscribers: 0"));
    }

    #[test]
    fn test_event_from_error() {
        let event = FeedbackEvent::from_error(&ConvertError::write("dbo.t", 3, "boom"));
        assert_eq!(event.severity, Severity::Warning);
        assert!(!event.ignorable);

        let event = FeedbackEvent::from_error(&ConvertError::TransactionRollback {
            table: "dbo.t".into(),
            message: "boom".into(),
        });
        assert_eq!(event.severity, Severity::Error);

        assert!(FeedbackEvent::info("x").ignorable);

        let escalated = FeedbackEvent::from_error(&ConvertError::write("dbo.t", 3, "boom"))
            .with_severity(Severity::Error);
        assert_eq!(escalated.severity, Severity::Error);
        assert!(!escalated.ignorable);
    }

    #[tokio::test]
    async fn test_subscribe_after_close_replays() {
        let hub = FeedbackHub::default();
        hub.info("done");
        hub.close();
        let mut rx = hub.subscribe();
        assert_eq!(rx.recv().await.map(|e| e.message).as_deref(), Some("done"));
        assert!(rx.recv().await.is_none());
    }
}
