//! User-initiated start requests. The coordinator serializes them behind a
//! single busy flag, routes the server's verdict into notices, and schedules
//! the near-term re-fetch that makes the dashboard react faster than the
//! regular poll cadence would.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use super::{Notice, NoticeBoard};
use crate::catalog::{PipelineCatalog, PipelineId};
use crate::gateway::{Gateway, TriggerOutcome};
use crate::log::*;
use crate::status::SharedStore;

#[derive(Error, Debug)]
pub enum TriggerErrors {
    #[error("Unknown pipeline `{0}`.")]
    UnknownPipeline(PipelineId),
    #[error("Another start request is still in flight.")]
    InteractionInFlight,
}

/// Coordinates start requests against the server.
///
/// The busy flag is coordinator-wide, not per-pipeline: while any start
/// request is outstanding, every start control is disabled. That matches the
/// dashboard this replaces; a per-pipeline flag map would let unrelated
/// pipelines stay clickable and is the obvious refinement if it ever
/// matters.
#[derive(Debug)]
pub struct TriggerCoordinator {
    gateway: Arc<dyn Gateway>,
    catalog: PipelineCatalog,
    store: SharedStore,
    notices: NoticeBoard,
    refetch_delay: Duration,
    busy: Arc<AtomicBool>,
}

/// Clears the busy flag on every exit path out of [`TriggerCoordinator::start`].
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl TriggerCoordinator {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        catalog: PipelineCatalog,
        store: SharedStore,
        notices: NoticeBoard,
        refetch_delay: Duration,
    ) -> Self {
        Self {
            gateway,
            catalog,
            store,
            notices,
            refetch_delay,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True while a start request is outstanding. The presentation layer
    /// consults this to disable start controls.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn acquire(&self) -> Option<BusyGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            .then(|| BusyGuard(self.busy.clone()))
    }

    /// Ask the server to start `id` and reconcile the local view with its
    /// verdict. `AlreadyRunning` and `Failed` leave the store untouched; the
    /// store only learns about a successful start from the deferred
    /// re-fetch, never from optimistic guessing.
    pub async fn start(&self, id: &PipelineId) -> Result<TriggerOutcome, TriggerErrors> {
        if !self.catalog.contains(id) {
            return Err(TriggerErrors::UnknownPipeline(id.clone()));
        }
        let _busy = self.acquire().ok_or(TriggerErrors::InteractionInFlight)?;

        if self.store.snapshot().get(id).is_running() {
            // The local view can be stale; the server decides conflicts.
            debug!("{} looks running locally, forwarding anyway", id);
        }

        let outcome = self.gateway.start_pipeline(id).await;
        match &outcome {
            TriggerOutcome::Started => {
                info!("{} started", id);
                self.schedule_refetch();
            }
            TriggerOutcome::AlreadyRunning => {
                info!("{} is already running server-side", id);
                self.notices.post(Notice::AlreadyRunning {
                    pipeline: id.clone(),
                });
            }
            TriggerOutcome::Failed(reason) => {
                warn!("failed to start {}: {}", id, reason);
                self.notices.post(Notice::TriggerFailed {
                    pipeline: id.clone(),
                    reason: reason.clone(),
                });
            }
        }
        Ok(outcome)
    }

    /// One-shot deferred fetch-all, independent of the recurring poll timer.
    fn schedule_refetch(&self) {
        let gateway = self.gateway.clone();
        let store = self.store.clone();
        let notices = self.notices.clone();
        let delay = self.refetch_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match gateway.fetch_all_statuses().await {
                Ok(statuses) => store.merge(&statuses),
                Err(e) => notices.post(Notice::PollFailed {
                    reason: e.to_string(),
                }),
            }
        });
    }
}
