//! Delayed-task scheduling for wait windows and session timeouts.
//!
//! Scheduling never blocks the caller. A task runs once after its delay
//! unless its [`TimerHandle`] was cancelled first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::task::AbortHandle;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Abstraction over "run this later".
///
/// In production: [`TokioScheduler`].
/// In unit tests: `manual::ManualScheduler` (time advanced by hand).
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle;
}

/// Cancellation handle for a scheduled task. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct TimerHandle {
    state: Arc<TimerState>,
}

#[derive(Debug, Default)]
struct TimerState {
    cancelled: AtomicBool,
    /// Set by schedulers that back the timer with a tokio task.
    abort: OnceLock<AbortHandle>,
}

impl TimerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prevent the task from running. No effect if it already ran. A timer
    /// backed by a tokio task is aborted so its sleep ends here.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
        if let Some(abort) = self.state.abort.get() {
            abort.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    fn attach(&self, abort: AbortHandle) {
        let _ = self.state.abort.set(abort);
    }
}

/// Runs each task on its own tokio task after `tokio::time::sleep`.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
}

impl TokioScheduler {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Bind to the runtime we are currently running on.
    pub fn current() -> Result<Self, tokio::runtime::TryCurrentError> {
        tokio::runtime::Handle::try_current().map(Self::new)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let timer = TimerHandle::new();
        let guard = timer.clone();
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if !guard.is_cancelled() {
                task();
            }
        });
        timer.attach(join.abort_handle());
        timer
    }
}


#[cfg(test)]
mod tests {
    use super::manual::ManualScheduler;
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn manual_runs_in_due_order() {
        let sched = ManualScheduler::new();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        for (delay, tag) in [(30, "b"), (10, "a"), (30, "c")] {
            let log = log.clone();
            sched.schedule(
                Duration::from_secs(delay),
                Box::new(move || log.lock().unwrap().push(tag)),
            );
        }
        sched.advance(Duration::from_secs(20));
        assert_eq!(*log.lock().unwrap(), vec!["a"]);
        sched.advance(Duration::from_secs(10));
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn cancelled_task_never_runs() {
        let sched = ManualScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let timer = sched.schedule(
            Duration::from_secs(1),
            Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );
        timer.cancel();
        assert_eq!(sched.pending(), 0);
        sched.advance(Duration::from_secs(5));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_scheduler_fires_after_delay() {
        let sched = TokioScheduler::current().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let start = tokio::time::Instant::now();
        sched.schedule(
            Duration::from_secs(30),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        rx.await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn tokio_cancel_ends_the_sleeping_task() {
        let sched = TokioScheduler::current().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let timer = sched.schedule(
            Duration::from_secs(600),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        timer.cancel();
        // Dropping the aborted task drops the task closure, closing the channel
        // long before the delay.
        let outcome = tokio::time::timeout(Duration::from_secs(5), rx).await;
        assert!(matches!(outcome, Ok(Err(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_scheduler_respects_cancel() {
        let sched = TokioScheduler::current().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let timer = sched.schedule(
            Duration::from_secs(5),
            Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );
        timer.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
