//! Bounded worker pool for script invocations.
//!
//! A fixed set of workers pulls invocations from a bounded admission
//! queue. Submitting while the queue is full waits for space instead of
//! dropping work, so every accepted invocation eventually runs.
//!
//! Per command name the pool keeps one [`ExecutionSlot`] pointing at the
//! most recently accepted invocation. A new submission replaces the slot
//! only if that invocation has finished; otherwise it is rejected with
//! [`SubmitError::AlreadyRunning`]. Queued invocations count as in flight.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::executor::Invocation;
use super::runner::ProcessRunner;
use super::status::ExecutionStatus;
use crate::error::CoreError;
use crate::types::InvocationId;

/// Worker count and admission queue capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_size: usize,
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.workers < 1 {
            return Err(CoreError::Validation(
                "Pool must have at least one worker".to_string(),
            ));
        }
        if self.queue_size < 1 {
            return Err(CoreError::Validation(
                "Admission queue size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Why a submission was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("The command {0} is already running")]
    AlreadyRunning(String),

    #[error("The execution pool is shutting down")]
    ShuttingDown,
}

/// Dedup bookkeeping for one command name.
struct ExecutionSlot {
    invocation_id: InvocationId,
    completion: watch::Receiver<Option<ExecutionStatus>>,
}

impl ExecutionSlot {
    /// Finished once a status is published or the worker side is gone.
    fn is_finished(&self) -> bool {
        self.completion.borrow().is_some() || self.completion.has_changed().is_err()
    }
}

/// An invocation waiting in, or taken from, the admission queue.
struct QueuedInvocation {
    invocation: Invocation,
    completion: watch::Sender<Option<ExecutionStatus>>,
}

/// Caller-side handle to an accepted invocation.
#[derive(Debug, Clone)]
pub struct InvocationHandle {
    id: InvocationId,
    command: String,
    completion: watch::Receiver<Option<ExecutionStatus>>,
}

impl InvocationHandle {
    pub fn id(&self) -> InvocationId {
        self.id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn is_finished(&self) -> bool {
        self.completion.borrow().is_some() || self.completion.has_changed().is_err()
    }

    /// Wait for the invocation to end. An invocation dropped from the
    /// queue by a shutdown reports [`ExecutionStatus::Cancelled`].
    pub async fn wait(mut self) -> ExecutionStatus {
        match self.completion.wait_for(Option::is_some).await {
            Ok(status) => (*status).unwrap_or(ExecutionStatus::Cancelled),
            Err(_) => ExecutionStatus::Cancelled,
        }
    }
}

/// Fixed-size worker pool with a bounded admission queue.
///
/// Created once at startup via [`ExecutionPool::start`]; the returned
/// `Arc` is shared by every dispatch path.
pub struct ExecutionPool {
    /// `None` once shutdown has begun.
    admission: Mutex<Option<mpsc::Sender<QueuedInvocation>>>,
    slots: Mutex<HashMap<String, ExecutionSlot>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Master cancellation token -- cancelled by [`ExecutionPool::kill_now`].
    cancel: CancellationToken,
}

impl ExecutionPool {
    /// Spawn the workers and open the admission queue.
    pub fn start(config: PoolConfig, runner: ProcessRunner) -> Result<Arc<Self>, CoreError> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.queue_size);
        let queue = Arc::new(Mutex::new(rx));
        let cancel = CancellationToken::new();

        let handles = (0..config.workers)
            .map(|worker| {
                let queue = Arc::clone(&queue);
                let runner = runner.clone();
                let cancel = cancel.child_token();
                tokio::spawn(async move {
                    run_worker(worker, queue, runner, cancel).await;
                })
            })
            .collect();

        tracing::info!(
            workers = config.workers,
            queue_size = config.queue_size,
            "Execution pool started",
        );

        Ok(Arc::new(Self {
            admission: Mutex::new(Some(tx)),
            slots: Mutex::new(HashMap::new()),
            workers: Mutex::new(handles),
            cancel,
        }))
    }

    /// Submit an invocation.
    ///
    /// Rejects immediately if the same command is still in flight. Waits
    /// while the admission queue is full.
    pub async fn submit(&self, invocation: Invocation) -> Result<InvocationHandle, SubmitError> {
        let sender = self
            .admission
            .lock()
            .await
            .clone()
            .ok_or(SubmitError::ShuttingDown)?;

        let command = invocation.command_name().to_string();
        let id = invocation.id;
        let (completion_tx, completion_rx) = watch::channel(None);

        {
            let mut slots = self.slots.lock().await;
            if let Some(slot) = slots.get(&command) {
                if !slot.is_finished() {
                    tracing::info!(
                        command = %command,
                        running = %slot.invocation_id,
                        "Rejected submission, command already running",
                    );
                    return Err(SubmitError::AlreadyRunning(command));
                }
            }
            slots.insert(
                command.clone(),
                ExecutionSlot {
                    invocation_id: id,
                    completion: completion_rx.clone(),
                },
            );
        }

        tracing::info!(
            command = %command,
            invocation_id = %id,
            reply_to = %invocation.reply_to,
            "Invocation accepted",
        );

        // Backpressure point: waits for queue space. If the workers are
        // gone the queued value (and its completion sender) is dropped,
        // which releases the slot.
        let queued = QueuedInvocation {
            invocation,
            completion: completion_tx,
        };
        if sender.send(queued).await.is_err() {
            tracing::warn!(command = %command, invocation_id = %id, "Pool closed before admission");
            return Err(SubmitError::ShuttingDown);
        }

        Ok(InvocationHandle {
            id,
            command,
            completion: completion_rx,
        })
    }

    /// Names of commands with an unfinished invocation.
    pub async fn in_flight(&self) -> Vec<String> {
        let slots = self.slots.lock().await;
        let mut names: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| !slot.is_finished())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Stop accepting submissions and wait for queued and running work
    /// to finish. Idempotent.
    pub async fn drain(&self) {
        if self.admission.lock().await.take().is_some() {
            tracing::info!("Draining execution pool");
        }
        self.join_workers().await;
    }

    /// Stop accepting submissions, kill running processes and discard
    /// queued work. Idempotent.
    pub async fn kill_now(&self) {
        self.admission.lock().await.take();
        if !self.cancel.is_cancelled() {
            tracing::warn!("Killing all in-flight invocations");
            self.cancel.cancel();
        }
        self.join_workers().await;
    }

    // ---- private helpers ----

    async fn join_workers(&self) {
        let handles = std::mem::take(&mut *self.workers.lock().await);
        if handles.is_empty() {
            return;
        }
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Pool worker panicked");
            }
        }
        tracing::info!("Execution pool stopped");
    }
}

/// Worker loop: take the next invocation and run it until the queue is
/// closed and empty, or the pool is killed.
async fn run_worker(
    worker: usize,
    queue: Arc<Mutex<mpsc::Receiver<QueuedInvocation>>>,
    runner: ProcessRunner,
    cancel: CancellationToken,
) {
    tracing::debug!(worker, "Pool worker started");
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            item = async { queue.lock().await.recv().await } => item,
        };
        let Some(item) = next else {
            break;
        };

        let status = runner.run(&item.invocation, &cancel).await;
        let _ = item.completion.send(Some(status));
    }
    tracing::debug!(worker, "Pool worker exited");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use assert_matches::assert_matches;

    use super::*;
    use crate::command::{CommandSpec, OutputPolicy};
    use crate::outbox::{Outbox, ReplyTarget};
    use crate::scripting::test_helpers::{
        remote, shell_spec, write_temp_script, RecordingConsole, RecordingMessenger,
    };

    fn pool(workers: usize, queue_size: usize) -> (Arc<ExecutionPool>, Arc<RecordingMessenger>) {
        let messenger = Arc::new(RecordingMessenger::default());
        let console = Arc::new(RecordingConsole::default());
        let runner = ProcessRunner::new(Outbox::new(messenger.clone(), console));
        let pool = ExecutionPool::start(
            PoolConfig {
                workers,
                queue_size,
            },
            runner,
        )
        .expect("valid pool config");
        (pool, messenger)
    }

    fn invocation(spec: &Arc<CommandSpec>) -> Invocation {
        Invocation::new(Arc::clone(spec), vec![], remote("admin@x"))
    }

    #[test]
    fn zero_sized_pool_rejected() {
        let config = PoolConfig {
            workers: 0,
            queue_size: 1,
        };
        assert_matches!(config.validate(), Err(CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn second_submission_rejected_while_running() {
        let script = write_temp_script("sleep 1\necho done\n");
        let spec = Arc::new(shell_spec("backup", &script, OutputPolicy::Collect));
        let (pool, messenger) = pool(2, 4);

        let first = pool.submit(invocation(&spec)).await.expect("accepted");
        let second = pool.submit(invocation(&spec)).await;
        assert_matches!(second, Err(SubmitError::AlreadyRunning(name)) if name == "backup");
        assert_eq!(pool.in_flight().await, vec!["backup".to_string()]);

        assert!(first.wait().await.is_success());
        let sent: Vec<String> = messenger.sent().into_iter().map(|(_, t)| t).collect();
        assert_eq!(sent, vec!["done\n"]);
    }

    #[tokio::test]
    async fn slot_reusable_after_completion() {
        let script = write_temp_script("echo ok\n");
        let spec = Arc::new(shell_spec("status", &script, OutputPolicy::Stream));
        let (pool, _) = pool(1, 1);

        let first = pool.submit(invocation(&spec)).await.expect("accepted");
        first.wait().await;

        let again = pool.submit(invocation(&spec)).await;
        assert!(again.is_ok());
        assert!(pool.in_flight().await.len() <= 1);
    }

    #[tokio::test]
    async fn failed_launch_releases_slot() {
        let spec = Arc::new(CommandSpec::new("ghost", "/nonexistent/ghost.sh").expect("valid spec"));
        let (pool, _) = pool(1, 1);

        let handle = pool.submit(invocation(&spec)).await.expect("accepted");
        assert_eq!(handle.wait().await, ExecutionStatus::Failed);
        assert!(pool.submit(invocation(&spec)).await.is_ok());
    }

    #[tokio::test]
    async fn different_commands_run_concurrently() {
        let script = write_temp_script("sleep 1\n");
        let a = Arc::new(shell_spec("a", &script, OutputPolicy::Stream));
        let b = Arc::new(shell_spec("b", &script, OutputPolicy::Stream));
        let (pool, _) = pool(2, 2);

        let started = Instant::now();
        let ha = pool.submit(invocation(&a)).await.expect("accepted");
        let hb = pool.submit(invocation(&b)).await.expect("accepted");
        ha.wait().await;
        hb.wait().await;

        assert!(started.elapsed() < Duration::from_millis(1900));
    }

    #[tokio::test]
    async fn full_queue_blocks_submitter_until_space_frees() {
        let slow = write_temp_script("sleep 1\n");
        let fast = write_temp_script("true\n");
        let a = Arc::new(shell_spec("a", &slow, OutputPolicy::Stream));
        let b = Arc::new(shell_spec("b", &fast, OutputPolicy::Stream));
        let c = Arc::new(shell_spec("c", &fast, OutputPolicy::Stream));
        let (pool, _) = pool(1, 1);

        let ha = pool.submit(invocation(&a)).await.expect("accepted");
        // Let the single worker take `a` off the queue.
        tokio::time::sleep(Duration::from_millis(150)).await;
        let hb = pool.submit(invocation(&b)).await.expect("queued");

        let pending_pool = Arc::clone(&pool);
        let c_invocation = invocation(&c);
        let pending = tokio::spawn(async move { pending_pool.submit(c_invocation).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!pending.is_finished(), "submission must wait for queue space");
        assert!(!ha.is_finished());

        let hc = pending
            .await
            .expect("submit task")
            .expect("accepted after backpressure");
        assert!(ha.wait().await.is_success());
        assert!(hb.wait().await.is_success());
        assert!(hc.wait().await.is_success());
    }

    #[tokio::test]
    async fn drain_waits_for_running_work() {
        let script = write_temp_script("sleep 1\necho finished\n");
        let spec = Arc::new(shell_spec("slow", &script, OutputPolicy::Collect));
        let (pool, messenger) = pool(1, 1);

        let handle = pool.submit(invocation(&spec)).await.expect("accepted");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        pool.drain().await;
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert!(handle.is_finished());
        assert_eq!(messenger.sent().len(), 1);

        assert_matches!(
            pool.submit(invocation(&spec)).await,
            Err(SubmitError::ShuttingDown)
        );
        // Second drain is a no-op.
        pool.drain().await;
    }

    #[tokio::test]
    async fn kill_now_stops_running_and_queued_work() {
        let script = write_temp_script("sleep 10\n");
        let running = Arc::new(shell_spec("running", &script, OutputPolicy::Stream));
        let queued = Arc::new(shell_spec("queued", &script, OutputPolicy::Stream));
        let (pool, _) = pool(1, 1);

        let h_running = pool.submit(invocation(&running)).await.expect("accepted");
        tokio::time::sleep(Duration::from_millis(150)).await;
        let h_queued = pool.submit(invocation(&queued)).await.expect("queued");

        let started = Instant::now();
        pool.kill_now().await;
        assert!(started.elapsed() < Duration::from_secs(5));

        assert_eq!(h_running.wait().await, ExecutionStatus::Cancelled);
        assert_eq!(h_queued.wait().await, ExecutionStatus::Cancelled);
        assert!(pool.in_flight().await.is_empty());

        pool.kill_now().await;
        assert_matches!(
            pool.submit(Invocation::new(running, vec![], ReplyTarget::Console))
                .await,
            Err(SubmitError::ShuttingDown)
        );
    }
}
