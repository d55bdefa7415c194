//! Delayed, at-most-once task execution.
//!
//! The scheduler is the thin timing primitive under the rest of the
//! core: the reactor uses it to bound registrations with timeouts and
//! the buffer sweep uses it for its cadence. One dedicated thread parks
//! on the earliest deadline in a min-heap and wakes when that deadline
//! arrives or an earlier one is inserted.
//!
//! Guarantees: a task never runs before its delay elapses, runs at most
//! once, and a cancelled handle prevents a run that has not started.
//! `stop()` rejects new work and lets an in-flight task finish; tasks
//! still waiting for their delay are discarded.

use crate::error::{CoreError, Result};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Handle for a scheduled task.
///
/// Dropping the handle does not cancel the task; only
/// [`ScheduledHandle::cancel`] does.
#[derive(Debug, Clone)]
pub struct ScheduledHandle {
    cancelled: Arc<AtomicBool>,
}

impl ScheduledHandle {
    /// Prevents the task from running if it has not started yet.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// True once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

struct TimerEntry {
    deadline: Instant,
    /// Insertion stamp; breaks deadline ties oldest-first and makes the
    /// heap order total without comparing task closures.
    generation: u64,
    cancelled: Arc<AtomicBool>,
    task: Task,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.generation == other.generation
    }
}

impl Eq for TimerEntry {}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reverse ordering for min-heap (earliest deadline first).
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    next_generation: u64,
}

struct SchedulerInner {
    queue: Mutex<TimerQueue>,
    condvar: Condvar,
    stopped: AtomicBool,
}

/// Delayed-execution queue with one dedicated timer thread.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Starts the timer thread under the given name.
    #[must_use]
    pub fn start(name: String) -> Self {
        let inner = Arc::new(SchedulerInner {
            queue: Mutex::new(TimerQueue::default()),
            condvar: Condvar::new(),
            stopped: AtomicBool::new(false),
        });

        let loop_inner = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || timer_loop(&loop_inner))
            .expect("failed to spawn scheduler thread");

        Self {
            inner,
            thread: Mutex::new(Some(handle)),
        }
    }

    /// Schedules `task` to run once, no earlier than `delay` from now.
    pub fn schedule<F>(&self, task: F, delay: Duration) -> Result<ScheduledHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(CoreError::Shutdown("scheduler"));
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let deadline = Instant::now() + delay;
        {
            let mut queue = self.inner.queue.lock();
            let generation = queue.next_generation;
            queue.next_generation += 1;
            let is_earliest = queue
                .heap
                .peek()
                .map_or(true, |earliest| deadline < earliest.deadline);
            queue.heap.push(TimerEntry {
                deadline,
                generation,
                cancelled: Arc::clone(&cancelled),
                task: Box::new(task),
            });
            if is_earliest {
                self.inner.condvar.notify_one();
            }
        }

        Ok(ScheduledHandle { cancelled })
    }

    /// Number of tasks waiting for their delay.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().heap.len()
    }

    /// Stops the scheduler: no new tasks, in-flight work completes,
    /// waiting tasks are discarded. Idempotent.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        self.inner.condvar.notify_all();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending())
            .field("stopped", &self.inner.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

fn timer_loop(inner: &Arc<SchedulerInner>) {
    loop {
        let due = {
            let mut queue = inner.queue.lock();
            loop {
                if inner.stopped.load(Ordering::Acquire) {
                    return;
                }
                let now = Instant::now();
                let earliest = queue.heap.peek().map(|entry| entry.deadline);
                match earliest {
                    None => {
                        inner.condvar.wait(&mut queue);
                    }
                    Some(deadline) if deadline <= now => {
                        break queue.heap.pop();
                    }
                    Some(deadline) => {
                        inner.condvar.wait_for(&mut queue, deadline - now);
                    }
                }
            }
        };

        if let Some(entry) = due {
            if entry.cancelled.load(Ordering::Acquire) {
                continue;
            }
            if let Err(panic) = catch_unwind(AssertUnwindSafe(entry.task)) {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                tracing::error!(panic = %msg, "scheduled task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn wait_for(cond: impl Fn() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn task_runs_after_delay() {
        let scheduler = Scheduler::start("test-timer".to_string());
        let ran_at = Arc::new(Mutex::new(None::<Instant>));

        let slot = Arc::clone(&ran_at);
        let scheduled_at = Instant::now();
        scheduler
            .schedule(
                move || {
                    *slot.lock() = Some(Instant::now());
                },
                Duration::from_millis(40),
            )
            .expect("schedule");

        assert!(wait_for(|| ran_at.lock().is_some(), Duration::from_secs(2)));
        let elapsed = ran_at.lock().expect("ran") - scheduled_at;
        assert!(
            elapsed >= Duration::from_millis(40),
            "ran {elapsed:?} after scheduling, before the delay elapsed"
        );
        scheduler.stop();
    }

    #[test]
    fn tasks_run_at_most_once() {
        let scheduler = Scheduler::start("test-timer".to_string());
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let c = Arc::clone(&count);
            scheduler
                .schedule(
                    move || {
                        c.fetch_add(1, Ordering::SeqCst);
                    },
                    Duration::from_millis(5),
                )
                .expect("schedule");
        }

        assert!(wait_for(
            || count.load(Ordering::SeqCst) == 10,
            Duration::from_secs(2)
        ));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), 10);
        scheduler.stop();
    }

    #[test]
    fn earlier_insertion_wakes_the_thread() {
        let scheduler = Scheduler::start("test-timer".to_string());
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        scheduler
            .schedule(
                move || o.lock().push("late"),
                Duration::from_millis(200),
            )
            .expect("schedule late");

        let o = Arc::clone(&order);
        scheduler
            .schedule(move || o.lock().push("early"), Duration::from_millis(20))
            .expect("schedule early");

        assert!(wait_for(|| order.lock().len() == 2, Duration::from_secs(2)));
        assert_eq!(*order.lock(), vec!["early", "late"]);
        scheduler.stop();
    }

    #[test]
    fn cancelled_task_never_runs() {
        let scheduler = Scheduler::start("test-timer".to_string());
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        let handle = scheduler
            .schedule(
                move || {
                    c.fetch_add(1, Ordering::SeqCst);
                },
                Duration::from_millis(50),
            )
            .expect("schedule");
        handle.cancel();
        assert!(handle.is_cancelled());

        thread::sleep(Duration::from_millis(150));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        scheduler.stop();
    }

    #[test]
    fn schedule_after_stop_fails() {
        let scheduler = Scheduler::start("test-timer".to_string());
        scheduler.stop();
        let err = scheduler
            .schedule(|| {}, Duration::from_millis(1))
            .expect_err("stopped scheduler must reject work");
        assert!(matches!(err, CoreError::Shutdown("scheduler")));
    }

    #[test]
    fn panicking_task_does_not_kill_the_thread() {
        let scheduler = Scheduler::start("test-timer".to_string());
        scheduler
            .schedule(|| panic!("intentional panic"), Duration::from_millis(5))
            .expect("schedule");

        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        scheduler
            .schedule(
                move || {
                    c.fetch_add(1, Ordering::SeqCst);
                },
                Duration::from_millis(20),
            )
            .expect("schedule");

        assert!(wait_for(
            || count.load(Ordering::SeqCst) == 1,
            Duration::from_secs(2)
        ));
        scheduler.stop();
    }
}
