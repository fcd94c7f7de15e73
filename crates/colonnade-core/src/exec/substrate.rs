//! Execution substrate boundary and the in-process worker pool.
//!
//! A [`Substrate`] runs stage tasks somewhere (threads here, remote workers
//! elsewhere) and reports each outcome through a [`TaskHandle`]. Failure is
//! an ordinary result, never a panic across the boundary.

use super::stage::{self, StageOutput};
use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::plan::{Stage, StageId};
use crossbeam_channel::{self as channel, Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Outcome of one task attempt.
pub type TaskResult = std::result::Result<StageOutput, TaskFailure>;

/// A failed task attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stage {stage} failed: {message}")]
pub struct TaskFailure {
    /// Failed stage.
    pub stage: StageId,
    /// Cause, as reported by the substrate.
    pub message: String,
}

impl TaskFailure {
    /// Creates a failure report.
    #[must_use]
    pub fn new(stage: StageId, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

/// One attempt at running a stage, with everything it reads.
#[derive(Clone)]
pub struct StageTask {
    /// Stage to run.
    pub stage: Arc<Stage>,
    /// Attempt number, starting at 1.
    pub attempt: u32,
    /// Outputs of the stage dependencies, in dependency order.
    pub inputs: Vec<Arc<StageOutput>>,
    /// Catalog the scans read from.
    pub catalog: Arc<Catalog>,
}

impl StageTask {
    /// Runs the stage on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns the stage's error, typically `CorruptBlock` or a storage error.
    pub fn run(&self) -> Result<StageOutput> {
        stage::run(&self.stage.op, &self.inputs, &self.catalog)
    }
}

impl std::fmt::Debug for StageTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageTask")
            .field("stage", &self.stage.id)
            .field("op", &self.stage.op.name())
            .field("attempt", &self.attempt)
            .field("inputs", &self.inputs.len())
            .finish_non_exhaustive()
    }
}

/// Caller's side of a submitted task.
#[derive(Debug)]
pub struct TaskHandle {
    stage: StageId,
    receiver: Receiver<TaskResult>,
    cancelled: Arc<AtomicBool>,
}

/// Substrate's side of a submitted task: reports its single outcome.
#[derive(Debug)]
pub struct Completion {
    stage: StageId,
    sender: Sender<TaskResult>,
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    /// Creates a connected handle and completion for `stage`.
    #[must_use]
    pub fn new(stage: StageId) -> (Self, Completion) {
        let (sender, receiver) = channel::bounded(1);
        let cancelled = Arc::new(AtomicBool::new(false));
        (
            Self {
                stage,
                receiver,
                cancelled: Arc::clone(&cancelled),
            },
            Completion {
                stage,
                sender,
                cancelled,
            },
        )
    }

    /// Stage this handle tracks.
    #[must_use]
    pub fn stage(&self) -> StageId {
        self.stage
    }

    /// Channel the outcome arrives on.
    #[must_use]
    pub fn receiver(&self) -> &Receiver<TaskResult> {
        &self.receiver
    }

    /// Requests cancellation; the task may still complete.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// True once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Completion {
    /// Stage being run.
    #[must_use]
    pub fn stage(&self) -> StageId {
        self.stage
    }

    /// True once the caller asked to cancel.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Reports the outcome. A caller that stopped listening is ignored.
    pub fn complete(self, result: TaskResult) {
        let _ = self.sender.send(result);
    }
}

/// Runs stage tasks.
pub trait Substrate: Send + Sync {
    /// Starts a task and returns its handle.
    ///
    /// # Errors
    ///
    /// Returns an error when the task cannot be accepted at all.
    fn submit(&self, task: StageTask) -> Result<TaskHandle>;

    /// Blocks until the task reports its outcome.
    ///
    /// A task dropped without reporting counts as failed.
    fn wait(&self, handle: &TaskHandle) -> TaskResult {
        handle.receiver.recv().unwrap_or_else(|_| {
            Err(TaskFailure::new(
                handle.stage,
                "task ended without reporting a result",
            ))
        })
    }

    /// Best-effort cancellation.
    fn cancel(&self, handle: &TaskHandle) {
        handle.cancel();
    }
}

struct Job {
    task: StageTask,
    completion: Completion,
}

/// Thread-pool substrate: workers pull tasks from a shared channel.
pub struct LocalSubstrate {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl LocalSubstrate {
    /// Starts `workers` threads (at least one).
    ///
    /// # Errors
    ///
    /// Returns `Io` if a thread cannot be spawned.
    pub fn new(workers: usize) -> Result<Self> {
        let (sender, receiver) = channel::unbounded::<Job>();
        let handles = (0..workers.max(1))
            .map(|i| {
                let receiver = receiver.clone();
                thread::Builder::new()
                    .name(format!("colonnade-worker-{i}"))
                    .spawn(move || run_worker(&receiver))
                    .map_err(Error::Io)
            })
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(workers = handles.len(), "Started local substrate");
        Ok(Self {
            sender: Some(sender),
            workers: handles,
        })
    }

    /// Number of worker threads.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers.len()
    }
}

impl Substrate for LocalSubstrate {
    fn submit(&self, task: StageTask) -> Result<TaskHandle> {
        let (handle, completion) = TaskHandle::new(task.stage.id);
        self.sender
            .as_ref()
            .ok_or_else(|| Error::Internal("worker pool is shut down".to_string()))?
            .send(Job { task, completion })
            .map_err(|_| Error::Internal("worker pool is shut down".to_string()))?;
        Ok(handle)
    }
}

impl Drop for LocalSubstrate {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for LocalSubstrate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSubstrate")
            .field("workers", &self.workers.len())
            .finish()
    }
}

fn run_worker(receiver: &Receiver<Job>) {
    while let Ok(Job { task, completion }) = receiver.recv() {
        let stage = task.stage.id;
        if completion.is_cancelled() {
            completion.complete(Err(TaskFailure::new(stage, "cancelled")));
            continue;
        }
        let result = match panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(TaskFailure::new(stage, e.to_string())),
            Err(_) => Err(TaskFailure::new(stage, "stage panicked")),
        };
        completion.complete(result);
    }
}
