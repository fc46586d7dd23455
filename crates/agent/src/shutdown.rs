//! Ordered shutdown of the agent.
//!
//! Steps run in order and independently; a failing step is logged and
//! the next one still runs:
//!
//! 1. close the messenger connection
//! 2. stop reading console input
//! 3. drain the execution pool (or kill it)
//! 4. stop the config watcher

use std::sync::Arc;

use scriptrelay_core::{ExecutionPool, Messenger};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Wait for queued and running scripts to finish.
    Drain,
    /// Kill running scripts first, then shut down.
    KillNow,
}

pub struct ShutdownSequence {
    messenger: Arc<dyn Messenger>,
    pool: Arc<ExecutionPool>,
    console_stop: CancellationToken,
    watcher_stop: CancellationToken,
}

impl ShutdownSequence {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        pool: Arc<ExecutionPool>,
        console_stop: CancellationToken,
        watcher_stop: CancellationToken,
    ) -> Self {
        Self {
            messenger,
            pool,
            console_stop,
            watcher_stop,
        }
    }

    /// Run every step. Returns the number of steps that failed.
    pub async fn run(&self, mode: ShutdownMode) -> usize {
        let mut failures = 0;
        tracing::info!(mode = ?mode, "Shutting down");

        if mode == ShutdownMode::KillNow {
            self.pool.kill_now().await;
            tracing::info!("In-flight scripts killed");
        }

        match self.messenger.close().await {
            Ok(()) => tracing::info!("Messenger closed"),
            Err(e) => {
                failures += 1;
                tracing::error!(error = %e, "Failed to close messenger");
            }
        }

        self.console_stop.cancel();
        tracing::info!("Console input stopped");

        let in_flight = self.pool.in_flight().await;
        if !in_flight.is_empty() {
            tracing::info!(commands = ?in_flight, "Waiting for running scripts");
        }
        self.pool.drain().await;
        tracing::info!("Execution pool drained");

        self.watcher_stop.cancel();
        tracing::info!("Config watcher stopped");

        tracing::info!(failures, "Shutdown complete");
        failures
    }
}
