//! Timer abstraction for reconnects, deferred sends and the detection watchdog.
//!
//! Production code uses [`ThreadScheduler`]. Tests drive time by hand with
//! `ManualScheduler` so delays like the 5000 ms watchdog run instantly and in
//! a known order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Cancellation handle for a scheduled task.
///
/// Dropping the handle does not cancel the task.
#[derive(Debug, Clone, Default)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

pub trait Scheduler: Send + Sync {
    /// Runs `task` once after `delay` unless the returned handle is cancelled first.
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle;
}

/// One sleeping thread per timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadScheduler;

impl Scheduler for ThreadScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let handle = TimerHandle::new();
        let flag = handle.clone();
        let spawned = thread::Builder::new()
            .name("hydrascope-timer".to_string())
            .spawn(move || {
                thread::sleep(delay);
                if !flag.is_cancelled() {
                    task();
                }
            });
        if let Err(err) = spawned {
            tracing::warn!(error = %err, delay_ms = delay.as_millis() as u64, "Failed to spawn timer thread");
        }
        handle
    }
}

#[cfg(any(test, feature = "test-helpers"))]
pub use manual::ManualScheduler;

#[cfg(any(test, feature = "test-helpers"))]
mod manual {
    use super::{lock, Scheduler, Task, TimerHandle};
    use std::sync::Mutex;
    use std::time::Duration;

    struct ManualTimer {
        due: Duration,
        seq: u64,
        handle: TimerHandle,
        task: Task,
    }

    #[derive(Default)]
    struct ManualState {
        now: Duration,
        next_seq: u64,
        timers: Vec<ManualTimer>,
    }

    /// Virtual clock; tasks run only inside [`ManualScheduler::advance`].
    #[derive(Default)]
    pub struct ManualScheduler {
        state: Mutex<ManualState>,
    }

    impl ManualScheduler {
        pub fn new() -> Self {
            Self::default()
        }

        /// Virtual time elapsed since creation.
        pub fn now(&self) -> Duration {
            lock(&self.state).now
        }

        /// Number of timers still waiting to fire.
        pub fn pending(&self) -> usize {
            lock(&self.state)
                .timers
                .iter()
                .filter(|timer| !timer.handle.is_cancelled())
                .count()
        }

        /// Delay from now until the next live timer fires.
        pub fn next_delay(&self) -> Option<Duration> {
            let state = lock(&self.state);
            state
                .timers
                .iter()
                .filter(|timer| !timer.handle.is_cancelled())
                .map(|timer| timer.due.saturating_sub(state.now))
                .min()
        }

        /// Moves the clock forward, running every task that falls due in
        /// deadline order. Tasks scheduled by those tasks run too if they fall
        /// inside the window.
        pub fn advance(&self, by: Duration) {
            let target = lock(&self.state).now + by;
            loop {
                let next = {
                    let mut state = lock(&self.state);
                    state.timers.retain(|timer| !timer.handle.is_cancelled());
                    let position = state
                        .timers
                        .iter()
                        .enumerate()
                        .filter(|(_, timer)| timer.due <= target)
                        .min_by_key(|(_, timer)| (timer.due, timer.seq))
                        .map(|(index, _)| index);
                    match position {
                        Some(index) => {
                            let timer = state.timers.remove(index);
                            state.now = timer.due;
                            Some(timer)
                        }
                        None => {
                            state.now = target;
                            None
                        }
                    }
                };

                match next {
                    Some(timer) => (timer.task)(),
                    None => break,
                }
            }
        }
    }

    impl Scheduler for ManualScheduler {
        fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
            let handle = TimerHandle::new();
            let mut state = lock(&self.state);
            let seq = state.next_seq;
            state.next_seq += 1;
            let due = state.now + delay;
            state.timers.push(ManualTimer {
                due,
                seq,
                handle: handle.clone(),
                task,
            });
            handle
        }
    }
}

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
