//! Delayed and periodic background tasks.
//!
//! The lock system never spawns anything itself; it is handed a [`Scheduler`]
//! at construction and gets a [`TaskHandle`] back for every lock expiry
//! and every keep-alive loop it sets up.
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Future produced by a scheduled callback.
pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// One-shot callback.
pub type Task = Box<dyn FnOnce() -> TaskFuture + Send>;

/// Callback that runs every period.
pub type RepeatingTask = Box<dyn FnMut() -> TaskFuture + Send>;

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// Runs callbacks after a delay, or periodically.
pub trait Scheduler: Debug + Send + Sync {
    /// Run `task` once, after `delay`.
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle;

    /// Run `task` every `period`; the first run is one period from now.
    fn schedule_repeating(&self, period: Duration, task: RepeatingTask) -> TaskHandle;
}

/// Handle on a scheduled task.
///
/// Cancelling is idempotent. A one-shot task that has already started is
/// left to finish; a periodic task stops at its next suspension point.
#[derive(Debug)]
pub struct TaskHandle {
    state: Arc<AtomicU8>,
    join: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Cancel the task. Returns `true` if this call stopped it from ever
    /// running (again).
    pub fn cancel(&self) -> bool {
        let cancelled = self
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if cancelled {
            if let Some(join) = self.join.as_ref() {
                join.abort();
            }
        }
        cancelled
    }

    /// True once a one-shot task has started running.
    pub fn has_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == FIRED
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }
}

/// A [`Scheduler`] that spawns onto a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> TokioScheduler {
        TokioScheduler { handle }
    }

    /// Scheduler on the runtime we are currently running on.
    ///
    /// Panics when called outside of a tokio runtime, like
    /// `tokio::runtime::Handle::current`.
    pub fn current() -> TokioScheduler {
        TokioScheduler::new(Handle::current())
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let state = Arc::new(AtomicU8::new(PENDING));
        let st = state.clone();
        let join = self.handle.spawn(async move {
            time::sleep(delay).await;
            if st
                .compare_exchange(PENDING, FIRED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                task().await;
            }
        });
        TaskHandle {
            state,
            join: Some(join),
        }
    }

    fn schedule_repeating(&self, period: Duration, mut task: RepeatingTask) -> TaskHandle {
        let state = Arc::new(AtomicU8::new(PENDING));
        let st = state.clone();
        let join = self.handle.spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if st.load(Ordering::Acquire) != PENDING {
                    break;
                }
                task().await;
            }
        });
        TaskHandle {
            state,
            join: Some(join),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_task(count: &Arc<AtomicUsize>) -> Task {
        let count = count.clone();
        Box::new(move || -> TaskFuture {
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_fires_once() {
        let sched = TokioScheduler::current();
        let count = Arc::new(AtomicUsize::new(0));
        let handle = sched.schedule(Duration::from_secs(10), counter_task(&count));

        time::sleep(Duration::from_secs(9)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(handle.has_fired());

        // cancelling after the fact is harmless.
        assert!(!handle.cancel());
        assert!(!handle.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_one_shot_never_runs() {
        let sched = TokioScheduler::current();
        let count = Arc::new(AtomicUsize::new(0));
        let handle = sched.schedule(Duration::from_secs(10), counter_task(&count));
        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(handle.is_cancelled());

        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn repeating_until_cancelled() {
        let sched = TokioScheduler::current();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handle = sched.schedule_repeating(
            Duration::from_secs(5),
            Box::new(move || -> TaskFuture {
                let c = c.clone();
                Box::pin(async move {
                    c.fetch_add(1, Ordering::SeqCst);
                })
            }),
        );

        time::sleep(Duration::from_secs(4)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        time::sleep(Duration::from_secs(12)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        assert!(handle.cancel());
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
