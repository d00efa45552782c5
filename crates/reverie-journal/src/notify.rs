//! Best-effort notification delivery.
//!
//! Notifications are queued onto a bounded channel and delivered by a
//! background worker. A full queue, a failing sink or a slow sink never
//! reaches the caller: the notification is logged and dropped.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use reverie_shared::{BlockId, ReplyId, UserId};
use reverie_store::Database;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A new block was shared with its recipients.
    BlockShared { block_id: BlockId },
    /// A reply was posted; one notification per other participant.
    ReplyPosted { reply_id: ReplyId, recipient: UserId },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::BlockShared { .. } => "pov_shared",
            Notification::ReplyPosted { .. } => "pov_reply",
        }
    }

    pub fn reference_id(&self) -> Uuid {
        match self {
            Notification::BlockShared { block_id } => block_id.0,
            Notification::ReplyPosted { reply_id, .. } => reply_id.0,
        }
    }
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Where notifications end up (mail, push, ...). Runs on the blocking pool.
pub trait NotificationSink: Send + Sync + 'static {
    fn deliver(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes each notification to the log as JSON.
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(notification)
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        info!(kind = notification.kind(), %payload, "Notification");
        Ok(())
    }
}

/// Called on the blocking pool after a successful delivery.
pub type DeliveryHook = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Records `notification_sent` on every recipient of a delivered
/// [`Notification::BlockShared`]. Owns its own connection.
pub fn block_receipts(db: Database) -> DeliveryHook {
    let db = Mutex::new(db);
    Arc::new(move |notification| {
        let Notification::BlockShared { block_id } = notification else {
            return;
        };
        let db = db.lock().unwrap_or_else(PoisonError::into_inner);
        match db.mark_block_notified(*block_id, Utc::now()) {
            Ok(updated) => debug!(block = %block_id, updated, "Recorded notification receipt"),
            Err(e) => warn!(block = %block_id, error = %e, "Failed to record notification receipt"),
        }
    })
}

/// Handle for queueing notifications. Cheap to clone.
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: Option<mpsc::Sender<Notification>>,
}

impl NotificationDispatcher {
    /// Start a worker on the current tokio runtime.
    pub fn spawn(sink: Arc<dyn NotificationSink>, capacity: usize, timeout: Duration) -> Self {
        Self::spawn_with_hook(sink, capacity, timeout, None)
    }

    pub fn spawn_with_hook(
        sink: Arc<dyn NotificationSink>,
        capacity: usize,
        timeout: Duration,
        on_delivered: Option<DeliveryHook>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(run_worker(rx, sink, timeout, on_delivered));
        Self { tx: Some(tx) }
    }

    /// A dispatcher with no queue. Everything queued is dropped.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Queue a notification without waiting. Returns whether it was accepted.
    pub fn queue(&self, notification: Notification) -> bool {
        let Some(tx) = &self.tx else {
            debug!(
                kind = notification.kind(),
                reference = %notification.reference_id(),
                "Notifications disabled, dropping"
            );
            return false;
        };

        match tx.try_send(notification) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(n)) => {
                warn!(kind = n.kind(), reference = %n.reference_id(), "Notification queue full, dropping");
                false
            }
            Err(mpsc::error::TrySendError::Closed(n)) => {
                warn!(kind = n.kind(), reference = %n.reference_id(), "Notification worker gone, dropping");
                false
            }
        }
    }

    pub fn queue_all(&self, notifications: impl IntoIterator<Item = Notification>) {
        for notification in notifications {
            self.queue(notification);
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<Notification>,
    sink: Arc<dyn NotificationSink>,
    timeout: Duration,
    on_delivered: Option<DeliveryHook>,
) {
    while let Some(notification) = rx.recv().await {
        let kind = notification.kind();
        let reference = notification.reference_id();

        let sink = Arc::clone(&sink);
        let hook = on_delivered.clone();
        let job = tokio::task::spawn_blocking(move || {
            sink.deliver(&notification)?;
            if let Some(hook) = hook {
                hook(&notification);
            }
            Ok::<(), NotifyError>(())
        });

        match tokio::time::timeout(timeout, job).await {
            Ok(Ok(Ok(()))) => debug!(kind, %reference, "Notification delivered"),
            Ok(Ok(Err(e))) => warn!(kind, %reference, error = %e, "Notification delivery failed"),
            Ok(Err(e)) => warn!(kind, %reference, error = %e, "Notification task panicked"),
            Err(_) => warn!(kind, %reference, ?timeout, "Notification delivery timed out"),
        }
    }

    debug!("Notification worker stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Recording {
        seen: Mutex<Vec<Notification>>,
    }

    impl NotificationSink for Recording {
        fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.seen.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    struct Failing;

    impl NotificationSink for Failing {
        fn deliver(&self, _: &Notification) -> Result<(), NotifyError> {
            Err(NotifyError::Delivery("smtp down".into()))
        }
    }

    struct Slow;

    impl NotificationSink for Slow {
        fn deliver(&self, _: &Notification) -> Result<(), NotifyError> {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[test]
    fn test_kind_and_reference() {
        let block_id = BlockId::new();
        let n = Notification::BlockShared { block_id };
        assert_eq!(n.kind(), "pov_shared");
        assert_eq!(n.reference_id(), block_id.0);

        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["type"], "block_shared");
    }

    #[test]
    fn test_disabled_drops() {
        let dispatcher = NotificationDispatcher::disabled();
        assert!(!dispatcher.queue(Notification::BlockShared {
            block_id: BlockId::new()
        }));
    }

    #[tokio::test]
    async fn test_delivers_and_runs_hook() {
        let sink = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
        });
        let hooked = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hooked);
        let hook: DeliveryHook = Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let dispatcher = NotificationDispatcher::spawn_with_hook(
            sink.clone(),
            8,
            Duration::from_secs(1),
            Some(hook),
        );
        assert!(dispatcher.queue(Notification::BlockShared {
            block_id: BlockId::new()
        }));
        settle().await;

        assert_eq!(sink.seen.lock().unwrap().len(), 1);
        assert_eq!(hooked.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let dispatcher = NotificationDispatcher::spawn(Arc::new(Failing), 8, Duration::from_secs(1));
        assert!(dispatcher.queue(Notification::BlockShared {
            block_id: BlockId::new()
        }));
        settle().await;

        // The worker is still alive after a failure.
        assert!(dispatcher.queue(Notification::BlockShared {
            block_id: BlockId::new()
        }));
    }

    #[tokio::test]
    async fn test_slow_sink_times_out() {
        let dispatcher = NotificationDispatcher::spawn(Arc::new(Slow), 8, Duration::from_millis(20));
        assert!(dispatcher.queue(Notification::BlockShared {
            block_id: BlockId::new()
        }));
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(dispatcher.queue(Notification::BlockShared {
            block_id: BlockId::new()
        }));
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let dispatcher = NotificationDispatcher::spawn(Arc::new(Slow), 1, Duration::from_secs(1));
        let accepted = (0..10)
            .filter(|_| {
                dispatcher.queue(Notification::BlockShared {
                    block_id: BlockId::new(),
                })
            })
            .count();
        assert!(accepted < 10);
    }
}
