//! Periodic reconciliation task.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hedgepool_ledger::PoolStore;
use hedgepool_types::{PoolError, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::reconciliation::{Reconciler, ReconciliationReport};

/// Handle to a running sweeper.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    reports: watch::Receiver<Option<Arc<ReconciliationReport>>>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Receiver that observes each completed sweep's report.
    #[must_use]
    pub fn reports(&self) -> watch::Receiver<Option<Arc<ReconciliationReport>>> {
        self.reports.clone()
    }

    /// Stop after the sweep in progress (if any) and wait for the task.
    ///
    /// # Errors
    /// `Internal` if the task panicked.
    pub async fn shutdown(self) -> Result<()> {
        // Err: the task already exited.
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|e| PoolError::Internal(format!("sweeper task failed: {e}")))
    }
}

/// Spawn a task running [`Reconciler::sweep`] every `interval`.
///
/// The first sweep runs immediately. Sweeps run on the blocking pool, one
/// at a time; a sweep that overruns the interval delays the next tick
/// rather than queueing extra ones.
pub fn spawn_sweeper<S: PoolStore + 'static>(
    reconciler: Arc<Reconciler<S>>,
    interval: Duration,
) -> SweeperHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let (report_tx, report_rx) = watch::channel(None);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(?interval, "Reconciliation sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reconciler = Arc::clone(&reconciler);
                    match tokio::task::spawn_blocking(move || reconciler.sweep(Utc::now())).await {
                        Ok(Ok(report)) => {
                            report_tx.send_replace(Some(Arc::new(report)));
                        }
                        Ok(Err(err)) => {
                            tracing::error!(error = %err, "Reconciliation sweep failed");
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "Reconciliation sweep panicked");
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Reconciliation sweeper stopped");
    });

    SweeperHandle {
        shutdown: shutdown_tx,
        reports: report_rx,
        task,
    }
}
