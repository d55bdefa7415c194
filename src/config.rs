//! Construction-time configuration for the server core.
//!
//! A [`CoreConfig`] is consumed once, when the reactor, allocators, lease
//! manager, and sweeper are built. Nothing here is hot-reloadable; the
//! embedding server constructs the core with the tuning it wants and the
//! core holds those values for its lifetime.

use std::time::Duration;

/// Default number of selector (polling) threads.
pub const DEFAULT_SELECTORS: usize = 1;

/// Default idle timeout before retiring worker threads above the minimum.
pub const DEFAULT_WORKER_IDLE: Duration = Duration::from_secs(10);

/// Default idle timeout for leased resources.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default retention for disk-backed buffer files before the sweep
/// reclaims them.
pub const DEFAULT_DISK_RETENTION: Duration = Duration::from_secs(300);

/// Tuning surface for the core subsystems.
///
/// Built with `Default` and adjusted through `with_*` methods:
///
/// ```
/// use spindle::CoreConfig;
/// use std::time::Duration;
///
/// let config = CoreConfig::default()
///     .with_selectors(2)
///     .with_workers(2, 8)
///     .with_buffer_capacities(4096, 1 << 20)
///     .with_disk_retention(Duration::from_secs(60));
/// ```
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Number of selector threads, each owning one OS poller.
    pub selectors: usize,
    /// Minimum worker threads kept alive.
    pub worker_min: usize,
    /// Maximum worker threads.
    pub worker_max: usize,
    /// Idle time before a worker above the minimum retires.
    pub worker_idle: Duration,
    /// Idle timeout applied to leased resources by the embedding server.
    pub idle_timeout: Duration,
    /// Initial capacity handed to allocators when the caller does not say.
    pub buffer_initial: usize,
    /// Maximum capacity handed to allocators when the caller does not say.
    pub buffer_maximum: usize,
    /// File-name prefix for disk-backed buffer files.
    pub temp_prefix: String,
    /// Age past which the sweep deletes a disk-backed buffer file.
    pub disk_retention: Duration,
    /// Cadence of the temp-namespace sweep.
    pub sweep_interval: Duration,
    /// Documented target for how far past its nominal expiry a contract
    /// may be collected. The reaper never collects early; this bound is
    /// the soft half of the accuracy contract and a test tolerance, not
    /// an enforced deadline.
    pub reaper_skew: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            selectors: DEFAULT_SELECTORS,
            worker_min: 1,
            worker_max: 4,
            worker_idle: DEFAULT_WORKER_IDLE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            buffer_initial: 4096,
            buffer_maximum: 1 << 20,
            temp_prefix: "spindle".to_string(),
            disk_retention: DEFAULT_DISK_RETENTION,
            sweep_interval: Duration::from_secs(60),
            reaper_skew: Duration::from_millis(5),
        }
    }
}

impl CoreConfig {
    /// Sets the number of selector threads. Clamped to at least one.
    #[must_use]
    pub fn with_selectors(mut self, selectors: usize) -> Self {
        self.selectors = selectors.max(1);
        self
    }

    /// Sets the worker pool bounds. `max` is raised to `min` if smaller.
    #[must_use]
    pub fn with_workers(mut self, min: usize, max: usize) -> Self {
        self.worker_min = min;
        self.worker_max = max.max(min).max(1);
        self
    }

    /// Sets the worker idle-retirement timeout.
    #[must_use]
    pub fn with_worker_idle(mut self, idle: Duration) -> Self {
        self.worker_idle = idle;
        self
    }

    /// Sets the per-resource idle timeout the embedding server leases with.
    #[must_use]
    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.idle_timeout = idle;
        self
    }

    /// Sets default buffer capacities. `maximum` is raised to `initial`
    /// if smaller.
    #[must_use]
    pub fn with_buffer_capacities(mut self, initial: usize, maximum: usize) -> Self {
        self.buffer_initial = initial;
        self.buffer_maximum = maximum.max(initial);
        self
    }

    /// Sets the temp-file prefix for disk-backed buffers.
    #[must_use]
    pub fn with_temp_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.temp_prefix = prefix.into();
        self
    }

    /// Sets how long disk-backed buffer files are retained before the
    /// sweep deletes them.
    #[must_use]
    pub fn with_disk_retention(mut self, retention: Duration) -> Self {
        self.disk_retention = retention;
        self
    }

    /// Sets the sweep cadence.
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the documented reaper skew target.
    #[must_use]
    pub fn with_reaper_skew(mut self, skew: Duration) -> Self {
        self.reaper_skew = skew;
        self
    }
}
