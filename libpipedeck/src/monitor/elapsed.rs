//! Live "time running" displays. Each running pipeline gets its own ticker
//! task that republishes `now - started_at` once a second; the set of
//! tickers is reconciled against every snapshot so a ticker exists exactly
//! while its pipeline runs, and a restarted pipeline gets a fresh ticker
//! instead of inheriting a stale one.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::catalog::PipelineId;
use crate::status::StatusStore;

/// Whole-seconds rendering, e.g. `"1m 5s"`. Negative deltas (clock skew
/// between client and server) clamp to zero.
pub fn format_elapsed(elapsed: chrono::Duration) -> String {
    let seconds = elapsed.num_seconds().max(0);
    format!("{}m {}s", seconds / 60, seconds % 60)
}

/// One pipeline's elapsed-time publisher. Publishes immediately on spawn and
/// then on every tick; stops publishing the moment it is dropped or
/// [`stop`](Self::stop)ped.
#[derive(Debug)]
pub struct ElapsedTicker {
    started_at: DateTime<Utc>,
    display: watch::Receiver<String>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ElapsedTicker {
    pub fn spawn(started_at: DateTime<Utc>, period: Duration) -> Self {
        let (tx, display) = watch::channel(format_elapsed(Utc::now() - started_at));
        let cancel = CancellationToken::new();

        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut tick = time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = tick.tick() => {
                        tx.send_replace(format_elapsed(Utc::now() - started_at));
                    }
                }
            }
        });

        Self {
            started_at,
            display,
            cancel,
            handle,
        }
    }

    /// The start timestamp this ticker was spawned from. A pipeline restart
    /// changes it, which is the signal to replace the ticker.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn display(&self) -> String {
        self.display.borrow().clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ElapsedTicker {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// The tickers for every currently running pipeline.
#[derive(Debug)]
pub struct TickerSet {
    period: Duration,
    tickers: HashMap<PipelineId, ElapsedTicker>,
}

impl TickerSet {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            tickers: HashMap::new(),
        }
    }

    /// Reconcile against a snapshot: tear down tickers whose pipeline left
    /// `Running` or restarted from a different `started_at`, then spawn
    /// tickers for running pipelines that lack one.
    pub fn sync(&mut self, snapshot: &StatusStore) {
        self.tickers.retain(|id, ticker| {
            let status = snapshot.get(id);
            status.is_running() && status.started_at() == &Some(ticker.started_at())
        });

        for (id, status) in snapshot.statuses() {
            if !status.is_running() {
                continue;
            }
            let Some(started_at) = status.started_at() else {
                continue;
            };
            self.tickers
                .entry(id.clone())
                .or_insert_with(|| ElapsedTicker::spawn(*started_at, self.period));
        }
    }

    /// The published elapsed string, or `None` when the pipeline is not
    /// running.
    pub fn elapsed(&self, id: &PipelineId) -> Option<String> {
        self.tickers.get(id).map(ElapsedTicker::display)
    }

    pub fn active(&self) -> usize {
        self.tickers.len()
    }

    pub fn clear(&mut self) {
        self.tickers.clear();
    }
}

impl Default for TickerSet {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
