//! The execution context continuations run on.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tokio::sync::mpsc;

/// A queued continuation.
pub struct Task {
    job: Box<dyn FnOnce() + Send + 'static>,
}

impl Task {
    pub(crate) fn new(job: impl FnOnce() + Send + 'static) -> Self {
        Self { job: Box::new(job) }
    }

    /// Run the continuation.
    ///
    /// A panic is contained here. Anything the continuation owned is
    /// dropped, so promises it was supposed to settle reject with
    /// [`BrokenPromise`](crate::BrokenPromise).
    pub fn run(self) {
        if catch_unwind(AssertUnwindSafe(self.job)).is_err() {
            tracing::error!("promise continuation panicked");
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}

/// Handle used to queue continuations.
///
/// Cheap to clone. The queue stays open while any handle exists.
#[derive(Clone)]
pub struct Executor {
    tasks: mpsc::UnboundedSender<Task>,
}

/// Receiving end of an [`Executor`].
///
/// Exactly one owner drains it, which is what makes continuation order
/// deterministic.
pub struct RunQueue {
    tasks: mpsc::UnboundedReceiver<Task>,
    executed: u64,
}

impl Executor {
    /// Create an executor and the queue that must be drained for it.
    #[must_use]
    pub fn new() -> (Self, RunQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self { tasks: tx },
            RunQueue {
                tasks: rx,
                executed: 0,
            },
        )
    }

    /// Create an executor whose queue is drained by a task on the current
    /// Tokio runtime.
    ///
    /// Must be called from within a runtime.
    #[must_use]
    pub fn spawn() -> Self {
        let (executor, queue) = Self::new();
        tokio::spawn(queue.run());
        executor
    }

    /// Queue a continuation.
    ///
    /// When the run queue is gone the task is dropped instead of run.
    pub(crate) fn schedule(&self, task: Task) {
        if let Err(mpsc::error::SendError(task)) = self.tasks.send(task) {
            tracing::debug!("execution context shut down, dropping continuation");
            drop(task);
        }
    }

    /// Whether the run queue has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tasks.is_closed()
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RunQueue {
    /// Wait for the next continuation.
    ///
    /// Returns `None` once every [`Executor`] handle is gone and the queue
    /// is empty. Cancel safe.
    pub async fn recv(&mut self) -> Option<Task> {
        let task = self.tasks.recv().await;
        if task.is_some() {
            self.executed += 1;
        }
        task
    }

    /// Run every continuation queued right now, including ones queued by
    /// the continuations themselves. Returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.tasks.try_recv() {
            self.executed += 1;
            ran += 1;
            task.run();
        }
        ran
    }

    /// Drain the queue until every executor handle is dropped.
    pub async fn run(mut self) {
        while let Some(task) = self.recv().await {
            task.run();
        }
        tracing::trace!(executed = self.executed, "run queue finished");
    }

    /// Number of continuations handed out so far.
    #[must_use]
    pub fn executed(&self) -> u64 {
        self.executed
    }
}

impl fmt::Debug for RunQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunQueue")
            .field("executed", &self.executed)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[test]
    fn test_tasks_run_in_queue_order() {
        let (executor, mut queue) = Executor::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let seen = Arc::clone(&seen);
            executor.schedule(Task::new(move || seen.lock().push(i)));
        }

        assert!(seen.lock().is_empty());
        assert_eq!(queue.run_pending(), 3);
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
        assert_eq!(queue.executed(), 3);
    }

    #[test]
    fn test_panicking_task_is_contained() {
        let (executor, mut queue) = Executor::new();
        let seen = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&seen);

        executor.schedule(Task::new(|| panic!("boom")));
        executor.schedule(Task::new(move || *flag.lock() = true));

        assert_eq!(queue.run_pending(), 2);
        assert!(*seen.lock());
    }

    #[test]
    fn test_schedule_after_queue_dropped() {
        let (executor, queue) = Executor::new();
        drop(queue);
        assert!(executor.is_closed());

        let dropped = Arc::new(());
        let held = Arc::clone(&dropped);
        executor.schedule(Task::new(move || drop(held)));
        assert_eq!(Arc::strong_count(&dropped), 1);
    }

    #[tokio::test]
    async fn test_run_ends_when_handles_dropped() {
        let (executor, queue) = Executor::new();
        let handle = tokio::spawn(queue.run());
        drop(executor);
        assert!(handle.await.is_ok());
    }
}
