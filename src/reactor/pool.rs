//! Bounded worker pool executing dispatched operations.
//!
//! The pool manages a set of OS threads separate from the selector
//! threads. Selectors never run application logic: every ready
//! [`Operation`](super::Operation) is handed here, so a slow pipeline
//! stalls at most one worker, never a poll loop.
//!
//! Threads are spawned lazily up to `max_threads`. When idle beyond the
//! configured timeout, threads above `min_threads` retire. Work that
//! panics is caught and logged; the worker thread survives, because
//! losing dispatch capacity to one misbehaving pipeline would starve
//! every other connection.

use crossbeam_queue::SegQueue;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle as ThreadJoinHandle};
use std::time::Duration;

/// Default idle timeout before retiring excess threads.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

type Work = Box<dyn FnOnce() + Send + 'static>;

/// A cloneable handle to the worker pool.
#[derive(Clone)]
pub struct WorkerPoolHandle {
    inner: Arc<PoolInner>,
}

/// The bounded pool of worker threads.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    /// Minimum number of threads to keep alive.
    min_threads: usize,
    /// Maximum number of threads allowed.
    max_threads: usize,
    /// Current number of live threads.
    active_threads: AtomicUsize,
    /// Number of threads currently executing work.
    busy_threads: AtomicUsize,
    /// Number of pending work items.
    pending_count: AtomicUsize,
    /// Work queue.
    queue: SegQueue<Work>,
    /// Shutdown flag.
    shutdown: AtomicBool,
    /// Condition variable for thread parking.
    condvar: Condvar,
    /// Mutex for the condition variable.
    mutex: Mutex<()>,
    /// Idle timeout for excess threads.
    idle_timeout: Duration,
    /// Thread name prefix.
    name_prefix: String,
    /// Thread join handles for cleanup.
    thread_handles: Mutex<Vec<ThreadJoinHandle<()>>>,
}

/// Configuration options for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolOptions {
    /// Idle timeout before retiring excess threads.
    pub idle_timeout: Duration,
    /// Thread name prefix.
    pub name_prefix: String,
}

impl Default for WorkerPoolOptions {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            name_prefix: "spindle".to_string(),
        }
    }
}

impl WorkerPool {
    /// Creates a pool with the given thread bounds.
    ///
    /// # Panics
    ///
    /// Panics if `max_threads` is 0.
    #[must_use]
    pub fn new(min_threads: usize, max_threads: usize) -> Self {
        Self::with_options(min_threads, max_threads, WorkerPoolOptions::default())
    }

    /// Creates a pool with custom options.
    #[must_use]
    pub fn with_options(
        min_threads: usize,
        max_threads: usize,
        options: WorkerPoolOptions,
    ) -> Self {
        assert!(max_threads > 0, "max_threads must be at least 1");
        let max_threads = max_threads.max(min_threads);

        let inner = Arc::new(PoolInner {
            min_threads,
            max_threads,
            active_threads: AtomicUsize::new(0),
            busy_threads: AtomicUsize::new(0),
            pending_count: AtomicUsize::new(0),
            queue: SegQueue::new(),
            shutdown: AtomicBool::new(false),
            condvar: Condvar::new(),
            mutex: Mutex::new(()),
            idle_timeout: options.idle_timeout,
            name_prefix: options.name_prefix,
            thread_handles: Mutex::new(Vec::with_capacity(max_threads)),
        });

        let pool = Self { inner };
        for _ in 0..min_threads {
            spawn_thread(&pool.inner);
        }
        pool
    }

    /// Returns a cloneable handle to this pool.
    #[must_use]
    pub fn handle(&self) -> WorkerPoolHandle {
        WorkerPoolHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Submits a work item for execution.
    pub fn submit<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        submit_on_inner(&self.inner, Box::new(work));
    }

    /// Returns the number of pending work items.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending_count.load(Ordering::Relaxed)
    }

    /// Returns the number of live threads.
    #[must_use]
    pub fn active_threads(&self) -> usize {
        self.inner.active_threads.load(Ordering::Relaxed)
    }

    /// Returns the number of threads currently executing work.
    #[must_use]
    pub fn busy_threads(&self) -> usize {
        self.inner.busy_threads.load(Ordering::Relaxed)
    }

    /// Returns `true` if the pool is shut down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Initiates shutdown. Pending work continues to execute; new
    /// submissions are dropped.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        let _guard = self.inner.mutex.lock().unwrap();
        self.inner.condvar.notify_all();
    }

    /// Shuts down and waits up to `timeout` for every thread to exit.
    ///
    /// Returns `true` if all threads exited, `false` on timeout.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.shutdown();

        let deadline = std::time::Instant::now() + timeout;
        while self.inner.active_threads.load(Ordering::Acquire) > 0 {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            {
                let _guard = self.inner.mutex.lock().unwrap();
                self.inner.condvar.notify_all();
            }
            thread::sleep(Duration::from_millis(10).min(remaining));
        }

        let mut handles = self.inner.thread_handles.lock().unwrap();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
        true
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
        let _ = self.shutdown_and_wait(Duration::from_secs(5));
    }
}

impl WorkerPoolHandle {
    /// Submits a work item for execution.
    pub fn submit<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        submit_on_inner(&self.inner, Box::new(work));
    }

    /// Returns the number of pending work items.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending_count.load(Ordering::Relaxed)
    }

    /// Returns `true` if the pool is shut down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("min_threads", &self.inner.min_threads)
            .field("max_threads", &self.inner.max_threads)
            .field(
                "active_threads",
                &self.inner.active_threads.load(Ordering::Relaxed),
            )
            .field(
                "pending_count",
                &self.inner.pending_count.load(Ordering::Relaxed),
            )
            .finish()
    }
}

impl fmt::Debug for WorkerPoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPoolHandle")
            .field(
                "active_threads",
                &self.inner.active_threads.load(Ordering::Relaxed),
            )
            .field(
                "pending_count",
                &self.inner.pending_count.load(Ordering::Relaxed),
            )
            .finish()
    }
}

fn submit_on_inner(inner: &Arc<PoolInner>, work: Work) {
    if inner.shutdown.load(Ordering::Acquire) {
        tracing::warn!("work submitted to a shut-down pool, dropped");
        return;
    }
    inner.queue.push(work);
    inner.pending_count.fetch_add(1, Ordering::Relaxed);

    maybe_spawn_thread(inner);
    let _guard = inner.mutex.lock().unwrap();
    inner.condvar.notify_one();
}

fn spawn_thread(inner: &Arc<PoolInner>) {
    let inner_clone = Arc::clone(inner);
    let thread_id = inner.active_threads.fetch_add(1, Ordering::Relaxed);
    let name = format!("{}-worker-{}", inner.name_prefix, thread_id);

    let spawned = thread::Builder::new().name(name).spawn(move || {
        worker_loop(&inner_clone);
        inner_clone.active_threads.fetch_sub(1, Ordering::Relaxed);
    });

    match spawned {
        Ok(handle) => inner
            .thread_handles
            .lock()
            .unwrap()
            .push(handle),
        Err(e) => {
            // Thread exhaustion degrades broadly; say so loudly.
            inner.active_threads.fetch_sub(1, Ordering::Relaxed);
            tracing::error!(error = %e, "failed to spawn worker thread");
        }
    }
}

fn maybe_spawn_thread(inner: &Arc<PoolInner>) {
    let active = inner.active_threads.load(Ordering::Relaxed);
    let busy = inner.busy_threads.load(Ordering::Relaxed);
    let pending = inner.pending_count.load(Ordering::Relaxed);

    if active < inner.max_threads && busy >= active && pending > 0 {
        spawn_thread(inner);
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        if let Some(work) = inner.queue.pop() {
            inner.pending_count.fetch_sub(1, Ordering::Relaxed);
            inner.busy_threads.fetch_add(1, Ordering::Relaxed);
            if let Err(panic) = catch_unwind(AssertUnwindSafe(work)) {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                tracing::error!(panic = %msg, "operation panicked on worker thread");
            }
            inner.busy_threads.fetch_sub(1, Ordering::Relaxed);
            continue;
        }

        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }

        let active = inner.active_threads.load(Ordering::Relaxed);
        if active > inner.min_threads {
            let guard = inner.mutex.lock().unwrap();
            let (guard, result) = {
                let r = inner
                    .condvar
                    .wait_timeout(guard, inner.idle_timeout)
                    .unwrap();
                (r.0, r.1)
            };
            drop(guard);
            if result.timed_out()
                && inner.queue.is_empty()
                && inner.active_threads.load(Ordering::Relaxed) > inner.min_threads
            {
                // Retire this thread.
                break;
            }
        } else {
            let guard = inner.mutex.lock().unwrap();
            let _guard = inner.condvar.wait(guard).unwrap();
        }
    }
}
