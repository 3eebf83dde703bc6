//! The one boundary where network semantics leak into the engine. Everything
//! above this trait is transport-agnostic.

use async_trait::async_trait;
use thiserror::Error;

use crate::catalog::PipelineId;
use crate::status::{PipelineStatus, StatusMap};

pub mod http;

/// Failures surfaced by status fetches. Transport failures (including
/// timeouts) mean no response reached the server and are retried by the next
/// poll tick; server failures carry the rejection.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("could not reach the pipeline server: {0}")]
    Transport(String),
    #[error("pipeline server returned {status}: {message}")]
    Server { status: u16, message: String },
}

/// Result of a start attempt. `AlreadyRunning` is a legitimate outcome, not
/// an error: the server refused to start a second run of the same pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started,
    AlreadyRunning,
    Failed(String),
}

/// What the engine needs from the pipeline server.
#[async_trait]
pub trait Gateway: std::fmt::Debug + Send + Sync {
    /// Fetch the status of every pipeline the server has run this session.
    async fn fetch_all_statuses(&self) -> Result<StatusMap, GatewayError>;

    /// Fetch the status of a single pipeline.
    async fn fetch_status(&self, id: &PipelineId) -> Result<PipelineStatus, GatewayError>;

    /// Ask the server to start a pipeline. Transport and server errors are
    /// folded into [`TriggerOutcome::Failed`]; a conflict response maps to
    /// [`TriggerOutcome::AlreadyRunning`].
    async fn start_pipeline(&self, id: &PipelineId) -> TriggerOutcome;
}

#[cfg(test)]
pub(crate) mod mock {
    //! A scripted gateway for tests: queued fetch results and trigger
    //! outcomes, with call counters. When the fetch queue runs dry the last
    //! successful map is repeated, like a quiet server would.

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    #[derive(Debug, Default)]
    pub struct MockGateway {
        fetches: Mutex<VecDeque<Result<StatusMap, GatewayError>>>,
        last_fetch: Mutex<Option<StatusMap>>,
        outcomes: Mutex<VecDeque<TriggerOutcome>>,
        fetch_calls: AtomicUsize,
        start_calls: AtomicUsize,
        start_delay: Mutex<Option<Duration>>,
    }

    impl MockGateway {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn script_fetch(&self, result: Result<StatusMap, GatewayError>) {
            self.fetches.lock().unwrap().push_back(result);
        }

        pub fn script_outcome(&self, outcome: TriggerOutcome) {
            self.outcomes.lock().unwrap().push_back(outcome);
        }

        pub fn delay_starts(&self, delay: Duration) {
            *self.start_delay.lock().unwrap() = Some(delay);
        }

        pub fn fetch_calls(&self) -> usize {
            self.fetch_calls.load(Ordering::SeqCst)
        }

        pub fn start_calls(&self) -> usize {
            self.start_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Gateway for MockGateway {
        async fn fetch_all_statuses(&self) -> Result<StatusMap, GatewayError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            let next = self.fetches.lock().unwrap().pop_front();
            match next {
                Some(Ok(statuses)) => {
                    *self.last_fetch.lock().unwrap() = Some(statuses.clone());
                    Ok(statuses)
                }
                Some(Err(error)) => Err(error),
                None => Ok(self
                    .last_fetch
                    .lock()
                    .unwrap()
                    .clone()
                    .unwrap_or_default()),
            }
        }

        async fn fetch_status(&self, id: &PipelineId) -> Result<PipelineStatus, GatewayError> {
            self.fetch_all_statuses()
                .await
                .map(|statuses| statuses.get(id).cloned().unwrap_or_default())
        }

        async fn start_pipeline(&self, _id: &PipelineId) -> TriggerOutcome {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.start_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| TriggerOutcome::Failed("no scripted outcome".into()))
        }
    }
}
