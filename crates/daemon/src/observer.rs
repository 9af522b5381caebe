//! Progress notification
//!
//! Long operations accept a [`Notifier`] and emit numbered progress events.
//! The events flow over a bounded channel whose receiving end is the proxy
//! connection; when the client disconnects the channel closes and the next
//! notification returns [`ObserverError::Cancelled`], which aborts the
//! producing operation at that checkpoint.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    #[error("operation cancelled by client disconnect")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Progress,
    Finished,
    Error,
}

/// One newline-delimited JSON chunk on the wire.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub message: String,
    pub completed: usize,
    pub total: usize,
}

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicUsize,
    total: AtomicUsize,
}

/// Emits progress events for one logical operation.
///
/// Subtasks share the operation's counters: creating one grows the total,
/// notifications advance the completed count.
#[derive(Clone)]
pub struct Notifier {
    tx: Option<mpsc::Sender<Event>>,
    counters: Arc<Counters>,
}

impl Notifier {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Notifier {
            tx: Some(tx),
            counters: Arc::new(Counters::default()),
        }
    }

    /// A notifier that swallows events, for flows with no attached client
    /// (environment-driven auto-login).
    pub fn disabled() -> Self {
        Notifier {
            tx: None,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Register `steps` upcoming steps and return a handle for them.
    pub fn subtask(&self, steps: usize) -> Notifier {
        self.counters.total.fetch_add(steps, Ordering::Relaxed);
        self.clone()
    }

    /// Emit a progress event, advancing the completed count when `advance`
    /// is set. Fails only when the client has gone away.
    pub async fn notify(&self, message: &str, advance: bool) -> Result<(), ObserverError> {
        if advance {
            self.counters.completed.fetch_add(1, Ordering::Relaxed);
        }

        let Some(tx) = &self.tx else {
            return Ok(());
        };

        let event = Event {
            kind: EventKind::Progress,
            message: message.to_string(),
            completed: self.counters.completed.load(Ordering::Relaxed),
            total: self.counters.total.load(Ordering::Relaxed),
        };
        tx.send(event).await.map_err(|_| ObserverError::Cancelled)
    }

    pub fn completed(&self) -> usize {
        self.counters.completed.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.counters.total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_subtasks_share_counters() {
        let (tx, mut rx) = mpsc::channel(8);
        let notifier = Notifier::new(tx);

        let a = notifier.subtask(2);
        let b = notifier.subtask(1);
        assert_eq!(notifier.total(), 3);

        a.notify("one", true).await.unwrap();
        b.notify("two", true).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, EventKind::Progress);
        assert_eq!(first.completed, 1);
        assert_eq!(first.total, 3);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.completed, 2);
    }

    #[tokio::test]
    async fn test_disconnect_cancels_at_next_checkpoint() {
        let (tx, rx) = mpsc::channel(8);
        let notifier = Notifier::new(tx);
        let task = notifier.subtask(2);

        drop(rx);
        let result = task.notify("never seen", true).await;
        assert!(matches!(result, Err(ObserverError::Cancelled)));
    }

    #[tokio::test]
    async fn test_disabled_notifier_never_fails() {
        let notifier = Notifier::disabled();
        let task = notifier.subtask(5);
        task.notify("quiet", true).await.unwrap();
        assert_eq!(task.completed(), 1);
    }

    #[test]
    fn test_event_wire_shape() {
        let event = Event {
            kind: EventKind::Progress,
            message: "Generating machine token".to_string(),
            completed: 1,
            total: 4,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["completed"], 1);
        assert_eq!(json["total"], 4);
    }
}
