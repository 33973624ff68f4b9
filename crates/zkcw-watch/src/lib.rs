//! Inclusion watcher: resolves a submitted transaction hash to a terminal
//! ledger outcome and notifies the caller once.
//!
//! States:
//! - `Watching`: status queries repeat with exponential backoff
//! - `Included`: the ledger reports the transaction in a block
//! - `Failed`: the ledger rejected the transaction
//! - `Expired`: `max_wait_ms` elapsed without a resolution
//!
//! Only the status query is retried. A submission is never resent from here.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};
use zkcw_rpc::LedgerQuery;
use zkcw_types::{ErrorInfo, ErrorKind, Hex, LedgerStatus, TransactionResult};

/// Watcher configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub backoff_factor: u32,
    pub max_wait_ms: u64,
    pub query_timeout_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 5_000,
            max_interval_ms: 60_000,
            backoff_factor: 2,
            max_wait_ms: 1_800_000,
            query_timeout_ms: 20_000,
        }
    }
}

impl WatchConfig {
    /// Reject settings that would poll without pause or never back off.
    pub fn check(&self) -> Result<(), String> {
        if self.initial_interval_ms == 0 {
            return Err("watch.initial_interval_ms must be positive".into());
        }
        if self.max_interval_ms < self.initial_interval_ms {
            return Err(format!(
                "watch.max_interval_ms ({}) is below watch.initial_interval_ms ({})",
                self.max_interval_ms, self.initial_interval_ms
            ));
        }
        if self.backoff_factor == 0 {
            return Err("watch.backoff_factor must be at least 1".into());
        }
        if self.max_wait_ms == 0 || self.query_timeout_ms == 0 {
            return Err("watch.max_wait_ms and watch.query_timeout_ms must be positive".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchState {
    Watching,
    Included,
    Expired,
    Failed,
}

impl WatchState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, WatchState::Watching)
    }
}

/// What the callback receives when a watch resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InclusionOutcome {
    pub tx_hash: Hex,
    pub state: WatchState,
    pub result: TransactionResult,
    pub attempts: u32,
}

impl InclusionOutcome {
    fn included(tx_hash: &str, block: String, attempts: u32) -> Self {
        Self {
            tx_hash: tx_hash.to_string(),
            state: WatchState::Included,
            result: TransactionResult::submitted(tx_hash, Some(json!({ "block": block }))),
            attempts,
        }
    }

    fn unresolved(tx_hash: &str, state: WatchState, error: ErrorInfo, attempts: u32) -> Self {
        let mut result = TransactionResult::failed(error);
        result.hash = Some(tx_hash.to_string());
        Self {
            tx_hash: tx_hash.to_string(),
            state,
            result,
            attempts,
        }
    }
}

/// Watch event for progress reporting.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Start { tx_hash: Hex },
    Poll { tx_hash: Hex, attempt: u32, status: LedgerStatus },
    QueryError { tx_hash: Hex, attempt: u32, message: String },
    Done { tx_hash: Hex, state: WatchState },
}

/// Callback type for watch events.
pub type WatchEventHandler = Arc<dyn Fn(WatchEvent) + Send + Sync>;

/// Polls the ledger for submitted transactions.
#[derive(Clone)]
pub struct InclusionWatcher {
    config: WatchConfig,
    ledger: Arc<dyn LedgerQuery>,
    on_event: Option<WatchEventHandler>,
}

impl InclusionWatcher {
    pub fn new(
        config: WatchConfig,
        ledger: Arc<dyn LedgerQuery>,
        on_event: Option<WatchEventHandler>,
    ) -> Self {
        Self { config, ledger, on_event }
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    fn emit(&self, event: WatchEvent) {
        if let Some(ref handler) = self.on_event {
            handler(event);
        }
    }

    /// Start watching `tx_hash` on a background task.
    ///
    /// `callback` runs at most once, and never after the returned handle has
    /// been cancelled or dropped.
    pub fn wait_for_inclusion<F>(&self, tx_hash: &str, callback: F) -> InclusionHandle
    where
        F: FnOnce(InclusionOutcome) + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let watcher = self.clone();
        let hash = tx_hash.to_string();
        let flag = Arc::clone(&cancelled);
        let task = tokio::spawn(async move {
            let Some(outcome) = watcher.resolve(&hash, &flag).await else {
                debug!(tx_hash = %hash, "watch cancelled");
                return;
            };
            if flag.load(Ordering::SeqCst) {
                return;
            }
            callback(outcome.clone());
            let _ = outcome_tx.send(outcome);
        });

        InclusionHandle {
            tx_hash: tx_hash.to_string(),
            cancelled,
            outcome: Some(outcome_rx),
            task: Some(task),
            detached: false,
        }
    }

    /// Poll until the hash reaches a terminal state. Returns `None` once
    /// `cancelled` is set, discarding any answer still in flight.
    pub async fn resolve(&self, tx_hash: &str, cancelled: &AtomicBool) -> Option<InclusionOutcome> {
        if tx_hash.trim().is_empty() {
            return Some(InclusionOutcome::unresolved(
                tx_hash,
                WatchState::Failed,
                ErrorInfo::new(ErrorKind::Failed, "empty transaction hash"),
                0,
            ));
        }

        self.emit(WatchEvent::Start { tx_hash: tx_hash.to_string() });
        info!(%tx_hash, "watching for inclusion");

        let max_wait = Duration::from_millis(self.config.max_wait_ms);
        let max_interval = Duration::from_millis(self.config.max_interval_ms);
        let query_timeout = Duration::from_millis(self.config.query_timeout_ms.max(1));
        let factor = self.config.backoff_factor.max(1);
        let deadline = Instant::now() + max_wait;
        let mut interval = Duration::from_millis(self.config.initial_interval_ms).min(max_interval);
        let mut attempt = 0u32;

        loop {
            if cancelled.load(Ordering::SeqCst) {
                return None;
            }
            if attempt > 0 && Instant::now() >= deadline {
                break;
            }

            attempt += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            let budget = query_timeout.min(remaining).max(Duration::from_millis(1));
            let answer = timeout(budget, self.ledger.transaction_status(tx_hash)).await;

            if cancelled.load(Ordering::SeqCst) {
                return None;
            }

            match answer {
                Ok(Ok(status)) => {
                    self.emit(WatchEvent::Poll {
                        tx_hash: tx_hash.to_string(),
                        attempt,
                        status: status.clone(),
                    });
                    match status {
                        LedgerStatus::Included { block } => {
                            info!(%tx_hash, %block, attempt, "transaction included");
                            return Some(self.finish(InclusionOutcome::included(tx_hash, block, attempt)));
                        }
                        LedgerStatus::Rejected { reason } => {
                            warn!(%tx_hash, %reason, attempt, "transaction rejected");
                            let error = ErrorInfo::new(ErrorKind::Failed, reason);
                            return Some(self.finish(InclusionOutcome::unresolved(
                                tx_hash,
                                WatchState::Failed,
                                error,
                                attempt,
                            )));
                        }
                        LedgerStatus::Pending => {
                            debug!(%tx_hash, attempt, "transaction pending");
                        }
                    }
                }
                Ok(Err(e)) => {
                    warn!(%tx_hash, attempt, error = %e, "status query failed");
                    self.emit(WatchEvent::QueryError {
                        tx_hash: tx_hash.to_string(),
                        attempt,
                        message: e.to_string(),
                    });
                }
                Err(_) => {
                    warn!(%tx_hash, attempt, "status query timed out");
                    self.emit(WatchEvent::QueryError {
                        tx_hash: tx_hash.to_string(),
                        attempt,
                        message: "status query timed out".into(),
                    });
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(interval.min(deadline - now)).await;
            interval = interval.saturating_mul(factor).min(max_interval);
        }

        info!(%tx_hash, attempts = attempt, "gave up waiting for inclusion");
        let error = ErrorInfo::new(
            ErrorKind::Expired,
            format!(
                "transaction not resolved within {} ms",
                self.config.max_wait_ms
            ),
        );
        Some(self.finish(InclusionOutcome::unresolved(
            tx_hash,
            WatchState::Expired,
            error,
            attempt,
        )))
    }

    fn finish(&self, outcome: InclusionOutcome) -> InclusionOutcome {
        self.emit(WatchEvent::Done {
            tx_hash: outcome.tx_hash.clone(),
            state: outcome.state,
        });
        outcome
    }
}

/// Handle to a running watch. Dropping it cancels the watch.
#[must_use = "dropping the handle cancels the watch; call detach() to keep it running"]
pub struct InclusionHandle {
    tx_hash: Hex,
    cancelled: Arc<AtomicBool>,
    outcome: Option<oneshot::Receiver<InclusionOutcome>>,
    task: Option<JoinHandle<()>>,
    detached: bool,
}

impl InclusionHandle {
    pub fn tx_hash(&self) -> &str {
        &self.tx_hash
    }

    /// Stop watching. A query already in flight completes but its answer is dropped.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Wait for the outcome. `None` if the watch was cancelled.
    pub async fn join(mut self) -> Option<InclusionOutcome> {
        let rx = self.outcome.take()?;
        rx.await.ok()
    }

    /// Let the watch run to completion without keeping the handle.
    pub fn detach(mut self) {
        self.detached = true;
    }
}

impl Drop for InclusionHandle {
    fn drop(&mut self) {
        if !self.detached {
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }
}
