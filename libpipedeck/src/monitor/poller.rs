//! Adaptive status polling. The poll timer only runs while at least one
//! pipeline is running; the decision is recomputed from the current snapshot
//! after every replacement, so a missed update corrects itself on the next
//! one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use super::{Notice, NoticeBoard};
use crate::gateway::Gateway;
use crate::log::*;
use crate::status::{SharedStore, StatusStore};

/// Timing knobs for the engine. The defaults mirror the dashboard: a 3 s
/// poll cadence while something is running, and a 500 ms re-fetch right
/// after a successful trigger.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub period: Duration,
    pub refetch_delay: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(3),
            refetch_delay: Duration::from_millis(500),
        }
    }
}

/// Whether continuous polling should be active for the given snapshot.
pub fn should_poll(store: &StatusStore) -> bool {
    store.any_running()
}

/// Owns the single poll timer. One supervising task holds at most one
/// interval at any time; starting and stopping are idempotent consequences
/// of re-evaluating [`should_poll`] against each new snapshot.
#[derive(Debug)]
pub struct Poller {
    cancel: CancellationToken,
    active: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Poller {
    pub fn spawn(
        gateway: Arc<dyn Gateway>,
        store: SharedStore,
        notices: NoticeBoard,
        period: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let active = Arc::new(AtomicBool::new(false));

        let task_cancel = cancel.clone();
        let task_active = active.clone();
        let handle = tokio::spawn(async move {
            let mut updates = store.subscribe();
            let mut ticker: Option<time::Interval> = None;
            loop {
                let wanted = should_poll(&updates.borrow_and_update());
                if wanted && ticker.is_none() {
                    debug!("pipelines running, polling every {:?}", period);
                    ticker = Some(time::interval_at(Instant::now() + period, period));
                } else if !wanted && ticker.is_some() {
                    debug!("no pipelines running, polling stopped");
                    ticker = None;
                }
                task_active.store(ticker.is_some(), Ordering::Release);

                match ticker.as_mut() {
                    Some(tick) => tokio::select! {
                        _ = task_cancel.cancelled() => break,
                        changed = updates.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = tick.tick() => poll_once(gateway.as_ref(), &store, &notices).await,
                    },
                    None => tokio::select! {
                        _ = task_cancel.cancelled() => break,
                        changed = updates.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    },
                }
            }
            task_active.store(false, Ordering::Release);
        });

        Self {
            cancel,
            active,
            handle,
        }
    }

    /// True while the recurring timer is armed.
    pub fn is_polling(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// A failed poll is surfaced and otherwise ignored; the timer keeps firing
/// so an intermittent outage heals on a later tick.
async fn poll_once(gateway: &dyn Gateway, store: &SharedStore, notices: &NoticeBoard) {
    match gateway.fetch_all_statuses().await {
        Ok(statuses) => store.merge(&statuses),
        Err(e) => {
            warn!("status poll failed: {}", e);
            notices.post(Notice::PollFailed {
                reason: e.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use color_eyre::eyre::Result;
    use tokio::time::sleep;

    use super::*;
    use crate::catalog::PipelineId;
    use crate::gateway::mock::MockGateway;
    use crate::status::{PipelineStatus, StatusMap};

    fn running_map(id: &str) -> StatusMap {
        let mut statuses = StatusMap::new();
        statuses.insert(PipelineId::new(id), PipelineStatus::running(Utc::now()));
        statuses
    }

    fn completed_map(id: &str) -> StatusMap {
        let now = Utc::now();
        let mut statuses = StatusMap::new();
        statuses.insert(PipelineId::new(id), PipelineStatus::completed(now, now));
        statuses
    }

    #[tokio::test]
    async fn polls_only_while_a_pipeline_is_running() -> Result<()> {
        let gateway = Arc::new(MockGateway::new());
        let store = SharedStore::new();
        let notices = NoticeBoard::new();
        let poller = Poller::spawn(
            gateway.clone(),
            store.clone(),
            notices,
            Duration::from_millis(20),
        );

        // Nothing running yet: the timer stays unarmed.
        sleep(Duration::from_millis(80)).await;
        assert_eq!(0, gateway.fetch_calls());
        assert!(!poller.is_polling());

        gateway.script_fetch(Ok(running_map("apollo")));
        store.merge(&running_map("apollo"));
        sleep(Duration::from_millis(120)).await;
        assert!(gateway.fetch_calls() >= 2);
        assert!(poller.is_polling());

        // The next fetch reports completion; polling must wind down.
        gateway.script_fetch(Ok(completed_map("apollo")));
        sleep(Duration::from_millis(80)).await;
        let settled = gateway.fetch_calls();
        sleep(Duration::from_millis(100)).await;
        assert_eq!(settled, gateway.fetch_calls());
        assert!(!poller.is_polling());
        assert!(!should_poll(&store.snapshot()));

        poller.stop();
        Ok(())
    }

    #[tokio::test]
    async fn a_failed_poll_does_not_stop_the_timer() -> Result<()> {
        let gateway = Arc::new(MockGateway::new());
        let store = SharedStore::new();
        let notices = NoticeBoard::new();
        let poller = Poller::spawn(
            gateway.clone(),
            store.clone(),
            notices.clone(),
            Duration::from_millis(20),
        );

        gateway.script_fetch(Err(crate::gateway::GatewayError::Transport(
            "connection refused".into(),
        )));
        gateway.script_fetch(Ok(running_map("apollo")));
        store.merge(&running_map("apollo"));

        sleep(Duration::from_millis(120)).await;
        assert!(gateway.fetch_calls() >= 2);
        assert!(poller.is_polling());
        assert!(matches!(
            notices.current(),
            Some(Notice::PollFailed { .. })
        ));

        poller.stop();
        Ok(())
    }

    #[tokio::test]
    async fn stop_disarms_the_timer_for_good() -> Result<()> {
        let gateway = Arc::new(MockGateway::new());
        let store = SharedStore::new();
        let poller = Poller::spawn(
            gateway.clone(),
            store.clone(),
            NoticeBoard::new(),
            Duration::from_millis(20),
        );

        gateway.script_fetch(Ok(running_map("apollo")));
        store.merge(&running_map("apollo"));
        sleep(Duration::from_millis(60)).await;

        poller.stop();
        sleep(Duration::from_millis(40)).await;
        let settled = gateway.fetch_calls();
        sleep(Duration::from_millis(80)).await;
        assert_eq!(settled, gateway.fetch_calls());
        Ok(())
    }
}
