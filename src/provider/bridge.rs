//! Subscription bridge.
//!
//! Forwards backend push notifications into the same invalidation path local
//! writes take. One task per binding; it ends when the provider closes its
//! feed or the task handle is dropped.

use std::sync::Arc;

use metrics::counter;
use tessera_types::ChangeNotification;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const METRIC_BRIDGE_NOTIFICATION: &str = "tessera_bridge_notification_total";

/// Receiver side of the bridge.
pub trait ChangeSink: Send + Sync + 'static {
    /// Reconcile the cache with one backend change.
    fn apply(&self, notification: &ChangeNotification);

    /// Called when notifications were dropped and the cache may have missed changes.
    fn resync(&self);
}

/// Running bridge. Aborts its task on drop.
#[derive(Debug)]
pub struct BridgeTask {
    handle: JoinHandle<()>,
}

impl BridgeTask {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for BridgeTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn spawn_bridge(
    mut receiver: broadcast::Receiver<ChangeNotification>,
    sink: Arc<dyn ChangeSink>,
) -> BridgeTask {
    let handle = tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(notification) => {
                    counter!(
                        METRIC_BRIDGE_NOTIFICATION,
                        "category" => notification.category.as_str(),
                        "change" => notification.change_type.as_str()
                    )
                    .increment(1);
                    debug!(
                        entity = %notification.entity_ref(),
                        change = notification.change_type.as_str(),
                        "Change notification received"
                    );
                    sink.apply(&notification);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Change feed lagged, resynchronizing realtime entries");
                    sink.resync();
                }
                Err(RecvError::Closed) => {
                    info!("Change feed closed");
                    break;
                }
            }
        }
    });

    BridgeTask { handle }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tessera_types::{Category, ChangeType};

    use super::*;
    use crate::cache::mutex_lock;

    #[derive(Default)]
    struct RecordingSink {
        applied: Mutex<Vec<String>>,
        resyncs: Mutex<usize>,
    }

    impl ChangeSink for RecordingSink {
        fn apply(&self, notification: &ChangeNotification) {
            mutex_lock(&self.applied, "test", "apply").push(notification.entity_ref().to_string());
        }

        fn resync(&self) {
            *mutex_lock(&self.resyncs, "test", "resync") += 1;
        }
    }

    #[tokio::test]
    async fn notifications_reach_the_sink_until_the_feed_closes() {
        let (sender, receiver) = broadcast::channel(8);
        let sink = Arc::new(RecordingSink::default());
        let task = spawn_bridge(receiver, sink.clone());

        sender
            .send(ChangeNotification::new(Category::Record, "r-1", ChangeType::Updated))
            .expect("receiver alive");
        sender
            .send(ChangeNotification::new(Category::Person, "p-1", ChangeType::Created))
            .expect("receiver alive");
        drop(sender);

        while !task.is_finished() {
            tokio::task::yield_now().await;
        }

        let applied = sink.applied.lock().expect("lock").clone();
        assert_eq!(applied, vec!["record/r-1", "person/p-1"]);
    }

    #[tokio::test]
    async fn lagging_triggers_a_resync() {
        let (sender, receiver) = broadcast::channel(1);
        sender
            .send(ChangeNotification::new(Category::Record, "r-1", ChangeType::Updated))
            .expect("receiver alive");
        sender
            .send(ChangeNotification::new(Category::Record, "r-2", ChangeType::Updated))
            .expect("receiver alive");

        let sink = Arc::new(RecordingSink::default());
        let task = spawn_bridge(receiver, sink.clone());
        drop(sender);
        while !task.is_finished() {
            tokio::task::yield_now().await;
        }

        assert_eq!(*sink.resyncs.lock().expect("lock"), 1);
        assert_eq!(sink.applied.lock().expect("lock").clone(), vec!["record/r-2"]);
    }
}
