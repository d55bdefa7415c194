//! Age-based reclamation of disk-backed buffer files.
//!
//! Disk-backed buffers deliberately leave their files behind (`clear`
//! and drop touch nothing), so something independent has to reclaim the
//! temp namespace. The sweeper deletes files that match the configured
//! prefix and are older than the retention duration, on a fixed
//! cadence, decoupled from any lease. Failures inside a sweep are
//! logged and self-healing on the next cycle.

use crate::config::CoreConfig;
use crate::schedule::Scheduler;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct SweeperInner {
    dir: PathBuf,
    prefix: String,
    retention: Duration,
    interval: Duration,
    stopped: AtomicBool,
    scheduler: Arc<Scheduler>,
}

/// Periodic sweep of the temp-file namespace.
pub struct BufferSweeper {
    inner: Arc<SweeperInner>,
}

impl BufferSweeper {
    /// Starts sweeping the platform temp directory on the configured
    /// cadence, via the given scheduler.
    #[must_use]
    pub fn start(config: &CoreConfig, scheduler: Arc<Scheduler>) -> Self {
        Self::start_in(std::env::temp_dir(), config, scheduler)
    }

    /// Starts sweeping an explicit directory.
    #[must_use]
    pub fn start_in(
        dir: impl Into<PathBuf>,
        config: &CoreConfig,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        let inner = Arc::new(SweeperInner {
            dir: dir.into(),
            prefix: config.temp_prefix.clone(),
            retention: config.disk_retention,
            interval: config.sweep_interval,
            stopped: AtomicBool::new(false),
            scheduler,
        });
        arm(&inner);
        Self { inner }
    }

    /// Runs one sweep immediately, returning how many files were
    /// deleted. The periodic cadence is unaffected.
    pub fn sweep_now(&self) -> usize {
        sweep_dir(&self.inner.dir, &self.inner.prefix, self.inner.retention)
    }

    /// Stops the cadence. A sweep already executing finishes.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
    }
}

impl Drop for BufferSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for BufferSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferSweeper")
            .field("dir", &self.inner.dir)
            .field("prefix", &self.inner.prefix)
            .field("retention", &self.inner.retention)
            .finish()
    }
}

/// Schedules the next sweep; each run re-arms itself until stopped.
fn arm(inner: &Arc<SweeperInner>) {
    let next = Arc::clone(inner);
    let result = inner.scheduler.schedule(
        move || {
            if next.stopped.load(Ordering::Acquire) {
                return;
            }
            let deleted = sweep_dir(&next.dir, &next.prefix, next.retention);
            if deleted > 0 {
                tracing::debug!(deleted, dir = %next.dir.display(), "buffer sweep reclaimed files");
            }
            arm(&next);
        },
        inner.interval,
    );
    if let Err(err) = result {
        // Scheduler already stopped; the cadence ends with it.
        tracing::debug!(error = %err, "buffer sweep not re-armed");
    }
}

/// Deletes prefix-matching files older than `retention`. Unreadable
/// entries are skipped; one bad file never stops the sweep.
pub(crate) fn sweep_dir(dir: &Path, prefix: &str, retention: Duration) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(dir = %dir.display(), error = %err, "buffer sweep cannot read directory");
            return 0;
        }
    };

    let mut deleted = 0;
    for entry in entries {
        let Ok(entry) = entry else { continue };
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(prefix) {
            continue;
        }

        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok());
        let Some(age) = age else {
            tracing::warn!(file = %name, "buffer sweep cannot stat file, skipped");
            continue;
        };

        if age >= retention {
            match std::fs::remove_file(entry.path()) {
                Ok(()) => deleted += 1,
                Err(err) => {
                    tracing::warn!(file = %name, error = %err, "buffer sweep cannot delete file");
                }
            }
        }
    }
    deleted
}
