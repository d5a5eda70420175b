//! Local alerts raised when the peripheral drops the connection.
//!
//! The gateway keeps at most one alert outstanding: raising a new alert first
//! cancels whatever is pending, so a burst of disconnects never stacks
//! redundant notifications.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// A local notification shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    /// Monotonic id, unique within a gateway.
    pub id: u64,
    /// Short title.
    pub title: String,
    /// Body text.
    pub body: String,
    /// When the alert was raised.
    pub raised_at: DateTime<Utc>,
}

/// Change in the outstanding alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertEvent {
    /// A new alert was scheduled.
    Raised(Alert),
    /// All pending alerts were cleared.
    Cancelled,
}

/// Platform hook that actually displays and removes notifications.
#[cfg_attr(test, mockall::automock)]
pub trait AlertSink: Send + Sync {
    /// Display `alert`.
    fn schedule(&self, alert: &Alert);

    /// Remove every pending or displayed alert.
    fn cancel_all(&self);
}

/// Sink that only logs; used on hosts without a notification center.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn schedule(&self, alert: &Alert) {
        warn!("{}: {}", alert.title, alert.body);
    }

    fn cancel_all(&self) {
        debug!("Alerts cleared");
    }
}

/// Fire-and-cancel front end over an [`AlertSink`].
pub struct NotificationGateway {
    sink: Box<dyn AlertSink>,
    title: String,
    body: String,
    pending: Mutex<Option<Alert>>,
    next_id: AtomicU64,
    event_tx: broadcast::Sender<AlertEvent>,
}

impl NotificationGateway {
    /// Default alert title.
    pub const DEFAULT_TITLE: &'static str = "Thermometer disconnected";
    /// Default alert body.
    pub const DEFAULT_BODY: &'static str = "The micro:bit is out of range or switched off.";

    /// Create a gateway with the default alert text.
    pub fn new(sink: Box<dyn AlertSink>) -> Self {
        Self::with_text(sink, Self::DEFAULT_TITLE, Self::DEFAULT_BODY)
    }

    /// Create a gateway with custom alert text.
    pub fn with_text(
        sink: Box<dyn AlertSink>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(16);

        Self {
            sink,
            title: title.into(),
            body: body.into(),
            pending: Mutex::new(None),
            next_id: AtomicU64::new(1),
            event_tx,
        }
    }

    /// Clear any pending alert.
    pub fn cancel_all(&self) {
        let mut pending = self.pending.lock();
        self.sink.cancel_all();
        if pending.take().is_some() {
            let _ = self.event_tx.send(AlertEvent::Cancelled);
        }
    }

    /// Replace any pending alert with a new disconnect alert.
    pub fn fire_disconnect_alert(&self) -> Alert {
        let mut pending = self.pending.lock();

        self.sink.cancel_all();
        if pending.take().is_some() {
            let _ = self.event_tx.send(AlertEvent::Cancelled);
        }

        let alert = Alert {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            title: self.title.clone(),
            body: self.body.clone(),
            raised_at: Utc::now(),
        };

        self.sink.schedule(&alert);
        *pending = Some(alert.clone());
        let _ = self.event_tx.send(AlertEvent::Raised(alert.clone()));

        alert
    }

    /// The outstanding alert, if any.
    pub fn pending(&self) -> Option<Alert> {
        self.pending.lock().clone()
    }

    /// Receive alert changes.
    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.event_tx.subscribe()
    }
}

impl Default for NotificationGateway {
    fn default() -> Self {
        Self::new(Box::new(LogAlertSink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::Sequence;
    use std::sync::Arc;

    #[test]
    fn test_fire_cancels_then_schedules() {
        let mut sink = MockAlertSink::new();
        let mut seq = Sequence::new();
        sink.expect_cancel_all()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        sink.expect_schedule()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());

        let gateway = NotificationGateway::new(Box::new(sink));
        let alert = gateway.fire_disconnect_alert();
        assert_eq!(gateway.pending(), Some(alert));
    }

    #[test]
    fn test_at_most_one_pending() {
        let gateway = NotificationGateway::default();
        let first = gateway.fire_disconnect_alert();
        let second = gateway.fire_disconnect_alert();

        assert_ne!(first.id, second.id);
        assert_eq!(gateway.pending(), Some(second));
    }

    #[test]
    fn test_cancel_all_clears_pending() {
        let gateway = NotificationGateway::default();
        gateway.fire_disconnect_alert();
        gateway.cancel_all();
        assert_eq!(gateway.pending(), None);
    }

    #[test]
    fn test_custom_text() {
        let gateway = NotificationGateway::with_text(Box::new(LogAlertSink), "Lost", "Come back");
        let alert = gateway.fire_disconnect_alert();
        assert_eq!(alert.title, "Lost");
        assert_eq!(alert.body, "Come back");
    }

    #[tokio::test]
    async fn test_events_for_burst() {
        let gateway = NotificationGateway::default();
        let mut rx = gateway.subscribe();

        gateway.fire_disconnect_alert();
        gateway.fire_disconnect_alert();

        assert!(matches!(rx.recv().await.unwrap(), AlertEvent::Raised(_)));
        assert_eq!(rx.recv().await.unwrap(), AlertEvent::Cancelled);
        assert!(matches!(rx.recv().await.unwrap(), AlertEvent::Raised(_)));
    }

    #[test]
    fn test_concurrent_fires_leave_one_pending() {
        let gateway = Arc::new(NotificationGateway::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gateway = gateway.clone();
                std::thread::spawn(move || {
                    gateway.fire_disconnect_alert();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let pending = gateway.pending().unwrap();
        assert_eq!(pending.id, 8);
    }
}
