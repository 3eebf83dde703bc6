//! Pipeline lifecycle states and the snapshot store the dashboard renders
//! from. A [`StatusStore`] is immutable; updates produce a new snapshot that
//! is swapped in wholesale through [`SharedStore`], so a render pass never
//! observes a half-applied update.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::catalog::PipelineId;

/// Lifecycle of a pipeline as the client sees it. `Idle` is the client-side
/// default for pipelines the server has never reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// A point-in-time status record for one pipeline. Replaced wholesale on
/// every update, never patched field by field.
///
/// Constructors enforce the field invariants: `started_at` is present for
/// every state past `Idle`, `completed_at` only for terminal states, and
/// `error` only for `Failed`.
#[derive(Getters, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatus {
    #[getter(skip)]
    state: PipelineState,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl PipelineStatus {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn running(started_at: DateTime<Utc>) -> Self {
        Self {
            state: PipelineState::Running,
            started_at: Some(started_at),
            completed_at: None,
            error: None,
        }
    }

    pub fn completed(started_at: DateTime<Utc>, completed_at: DateTime<Utc>) -> Self {
        Self {
            state: PipelineState::Completed,
            started_at: Some(started_at),
            completed_at: Some(completed_at),
            error: None,
        }
    }

    pub fn failed<S: Into<String>>(
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        error: S,
    ) -> Self {
        Self {
            state: PipelineState::Failed,
            started_at: Some(started_at),
            completed_at: Some(completed_at),
            error: Some(error.into()),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == PipelineState::Running
    }
}

/// Statuses keyed by pipeline id, as returned by a fetch-all.
pub type StatusMap = HashMap<PipelineId, PipelineStatus>;

/// An immutable snapshot of every known pipeline status. Lookups are total:
/// a pipeline the server never mentioned reads as `Idle`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusStore {
    statuses: StatusMap,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce a new snapshot where every key present in `partial` overwrites
    /// the prior record and all other keys are preserved unchanged.
    pub fn merge(&self, partial: &StatusMap) -> StatusStore {
        let mut statuses = self.statuses.clone();
        for (id, status) in partial {
            statuses.insert(id.clone(), status.clone());
        }
        StatusStore { statuses }
    }

    pub fn get(&self, id: &PipelineId) -> PipelineStatus {
        self.statuses.get(id).cloned().unwrap_or_default()
    }

    pub fn any_running(&self) -> bool {
        self.statuses.values().any(PipelineStatus::is_running)
    }

    pub fn statuses(&self) -> &StatusMap {
        &self.statuses
    }
}

/// The single shared handle to the current snapshot. Merges always apply to
/// the snapshot current at resolution time, so a fetch that resolves after
/// interleaved updates cannot clobber them; subscribers are notified on
/// every replacement.
#[derive(Debug, Clone)]
pub struct SharedStore {
    tx: Arc<watch::Sender<StatusStore>>,
}

impl SharedStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(StatusStore::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> StatusStore {
        self.tx.borrow().clone()
    }

    pub fn merge(&self, partial: &StatusMap) {
        self.tx.send_modify(|store| *store = store.merge(partial));
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusStore> {
        self.tx.subscribe()
    }
}

impl Default for SharedStore {
    fn default() -> Self {
        Self::new()
    }
}
