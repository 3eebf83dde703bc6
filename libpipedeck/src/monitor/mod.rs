//! The engine behind the dashboard: one facade wiring the shared status
//! snapshot, the adaptive poller, the trigger coordinator, and the
//! elapsed-time tickers, exposing exactly what a presentation layer needs.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::catalog::{PipelineCatalog, PipelineId};
use crate::gateway::{Gateway, GatewayError, TriggerOutcome};
use crate::status::{SharedStore, StatusStore};

pub mod elapsed;
pub mod poller;
pub mod trigger;

pub use elapsed::{format_elapsed, ElapsedTicker, TickerSet};
pub use poller::{should_poll, PollConfig, Poller};
pub use trigger::{TriggerCoordinator, TriggerErrors};

/// A transient, user-visible message. Only the most recent one is kept; a
/// new notice replaces the old rather than queueing behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    AlreadyRunning { pipeline: PipelineId },
    TriggerFailed { pipeline: PipelineId, reason: String },
    PollFailed { reason: String },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning { pipeline } => {
                write!(f, "{} is already running", pipeline)
            }
            Self::TriggerFailed { pipeline, reason } => {
                write!(f, "failed to start {}: {}", pipeline, reason)
            }
            Self::PollFailed { reason } => {
                write!(f, "cannot fetch pipeline statuses: {}", reason)
            }
        }
    }
}

/// Holder of the single current notice.
#[derive(Debug, Clone)]
pub struct NoticeBoard {
    tx: Arc<watch::Sender<Option<Notice>>>,
}

impl NoticeBoard {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn post(&self, notice: Notice) {
        self.tx.send_replace(Some(notice));
    }

    pub fn dismiss(&self) {
        self.tx.send_replace(None);
    }

    pub fn current(&self) -> Option<Notice> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Notice>> {
        self.tx.subscribe()
    }
}

impl Default for NoticeBoard {
    fn default() -> Self {
        Self::new()
    }
}

/// The live engine. Spawns the poller and the ticker-reconciliation task on
/// construction; [`shutdown`](Self::shutdown) (or drop) releases every timer
/// unconditionally.
#[derive(Debug)]
pub struct Monitor {
    catalog: PipelineCatalog,
    gateway: Arc<dyn Gateway>,
    store: SharedStore,
    notices: NoticeBoard,
    coordinator: TriggerCoordinator,
    poller: Poller,
    tickers: Arc<Mutex<TickerSet>>,
    sync_cancel: CancellationToken,
}

impl Monitor {
    /// Must be called from within a tokio runtime.
    pub fn spawn(gateway: Arc<dyn Gateway>, catalog: PipelineCatalog, config: PollConfig) -> Self {
        let store = SharedStore::new();
        let notices = NoticeBoard::new();
        let coordinator = TriggerCoordinator::new(
            gateway.clone(),
            catalog.clone(),
            store.clone(),
            notices.clone(),
            config.refetch_delay,
        );
        let poller = Poller::spawn(
            gateway.clone(),
            store.clone(),
            notices.clone(),
            config.period,
        );

        let tickers = Arc::new(Mutex::new(TickerSet::default()));
        let sync_cancel = CancellationToken::new();
        let task_cancel = sync_cancel.clone();
        let task_tickers = tickers.clone();
        let mut updates = store.subscribe();
        tokio::spawn(async move {
            loop {
                {
                    let snapshot = updates.borrow_and_update().clone();
                    task_tickers
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .sync(&snapshot);
                }
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    changed = updates.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            catalog,
            gateway,
            store,
            notices,
            coordinator,
            poller,
            tickers,
            sync_cancel,
        }
    }

    pub fn catalog(&self) -> &PipelineCatalog {
        &self.catalog
    }

    /// The snapshot the presentation layer renders from.
    pub fn snapshot(&self) -> StatusStore {
        self.store.snapshot()
    }

    /// Change notifications: fires after every snapshot replacement.
    pub fn subscribe(&self) -> watch::Receiver<StatusStore> {
        self.store.subscribe()
    }

    /// Immediate fetch-all, as the dashboard does once on mount. A failure
    /// is surfaced both as the return value and as a notice.
    pub async fn refresh(&self) -> Result<(), GatewayError> {
        match self.gateway.fetch_all_statuses().await {
            Ok(statuses) => {
                self.store.merge(&statuses);
                Ok(())
            }
            Err(e) => {
                self.notices.post(Notice::PollFailed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    pub async fn start(&self, id: &PipelineId) -> Result<TriggerOutcome, TriggerErrors> {
        self.coordinator.start(id).await
    }

    pub fn is_busy(&self) -> bool {
        self.coordinator.is_busy()
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_polling()
    }

    pub fn notice(&self) -> Option<Notice> {
        self.notices.current()
    }

    pub fn dismiss_notice(&self) {
        self.notices.dismiss()
    }

    pub fn subscribe_notices(&self) -> watch::Receiver<Option<Notice>> {
        self.notices.subscribe()
    }

    /// Elapsed running time for `id`, when it is running.
    pub fn elapsed(&self, id: &PipelineId) -> Option<String> {
        self.tickers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed(id)
    }

    /// Stop the poller, the ticker reconciler, and every elapsed ticker.
    pub fn shutdown(&self) {
        self.poller.stop();
        self.sync_cancel.cancel();
        self.tickers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
