//! Periodic expiry of stale message groups.

use std::time::Duration;

use junction_core::Lifecycle;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StoreResult;
use crate::store::SharedStore;

/// Default age after which a group is expired.
pub const DEFAULT_REAPER_TIMEOUT: Duration = Duration::from_secs(60);

/// Default sweep interval.
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(10);

/// Sweeps a store on an interval, expiring groups older than a timeout.
///
/// Expiry hands each group to the store's expiry callbacks, so aggregators
/// registered with the store release or discard their stale groups.
pub struct MessageGroupStoreReaper {
    store: SharedStore,
    timeout: Duration,
    interval: Duration,
    worker: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl MessageGroupStoreReaper {
    /// Creates a stopped reaper with the default timeout and interval.
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            timeout: DEFAULT_REAPER_TIMEOUT,
            interval: DEFAULT_REAPER_INTERVAL,
            worker: Mutex::new(None),
        }
    }

    /// Sets the group age after which groups are expired.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the sweep interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs one sweep now; returns the number of expired groups.
    pub async fn run_once(&self) -> StoreResult<usize> {
        let expired = self.store.expire_message_groups(self.timeout).await?;
        if expired > 0 {
            debug!(expired, "Reaper expired message groups");
        }
        Ok(expired)
    }
}

impl Lifecycle for MessageGroupStoreReaper {
    fn start(&self) {
        let mut worker = self.worker.lock();
        if worker
            .as_ref()
            .is_some_and(|(token, task)| !token.is_cancelled() && !task.is_finished())
        {
            return;
        }

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let store = self.store.clone();
        let (timeout, period) = (self.timeout, self.interval);

        let task = tokio::spawn(async move {
            info!(?period, ?timeout, "Message group reaper started");
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        match store.expire_message_groups(timeout).await {
                            Ok(0) => {}
                            Ok(expired) => debug!(expired, "Reaper expired message groups"),
                            Err(e) => warn!(error = %e, "Reaper sweep failed"),
                        }
                    }
                }
            }
            info!("Message group reaper stopped");
        });

        *worker = Some((token, task));
    }

    fn stop(&self) {
        if let Some((token, _task)) = self.worker.lock().take() {
            token.cancel();
        }
    }

    fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|(token, task)| !token.is_cancelled() && !task.is_finished())
    }
}

impl std::fmt::Debug for MessageGroupStoreReaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageGroupStoreReaper")
            .field("timeout", &self.timeout)
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MessageGroupStore, SimpleMessageStore};
    use junction_core::Message;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_run_once_respects_timeout() {
        let store: SharedStore = Arc::new(SimpleMessageStore::new());
        store.add_message_to_group(&"k".into(), Message::new("a")).await.unwrap();

        let patient = MessageGroupStoreReaper::new(store.clone()).with_timeout(Duration::from_secs(3600));
        assert_eq!(patient.run_once().await.unwrap(), 0);

        let eager = MessageGroupStoreReaper::new(store.clone()).with_timeout(Duration::ZERO);
        assert_eq!(eager.run_once().await.unwrap(), 1);
        assert_eq!(store.message_group_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_background_sweeps_until_stopped() {
        let store: SharedStore = Arc::new(SimpleMessageStore::new());
        let reaper = MessageGroupStoreReaper::new(store.clone())
            .with_timeout(Duration::ZERO)
            .with_interval(Duration::from_millis(10));
        reaper.start();
        assert!(reaper.is_running());

        store.add_message_to_group(&"k".into(), Message::new("a")).await.unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while store.message_group_count().await.unwrap() > 0 {
            assert!(tokio::time::Instant::now() < deadline, "group was never reaped");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        reaper.stop();
        assert!(!reaper.is_running());
    }
}
