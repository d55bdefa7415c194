//! Disk-backed buffers over per-buffer temp files.

use super::{Allocator, Buffer};
use crate::error::{CoreError, Result};
use std::fs::{File, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct FileDefaults {
    dir: PathBuf,
    prefix: String,
    limit: usize,
    initial: usize,
    maximum: usize,
    counter: AtomicU64,
}

/// Allocator of disk-backed buffers, one temp file per buffer.
///
/// Files are created lazily on first append, named
/// `<prefix>-<pid>-<n>.buf` under the configured directory (the
/// platform temp directory by default), and reclaimed by the
/// [`BufferSweeper`](super::BufferSweeper) or an explicit
/// [`FileBuffer::close`] — never by `clear`.
#[derive(Clone)]
pub struct FileAllocator {
    defaults: Arc<FileDefaults>,
}

impl FileAllocator {
    /// Creates an allocator writing under the platform temp directory.
    #[must_use]
    pub fn new(prefix: impl Into<String>, initial: usize, maximum: usize) -> Self {
        Self::in_dir(std::env::temp_dir(), prefix, initial, maximum)
    }

    /// Creates an allocator using the configured prefix and default
    /// capacities.
    #[must_use]
    pub fn from_config(config: &crate::config::CoreConfig) -> Self {
        Self::new(
            config.temp_prefix.clone(),
            config.buffer_initial,
            config.buffer_maximum,
        )
    }

    /// Creates an allocator writing under an explicit directory.
    #[must_use]
    pub fn in_dir(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        initial: usize,
        maximum: usize,
    ) -> Self {
        Self {
            defaults: Arc::new(FileDefaults {
                dir: dir.into(),
                prefix: prefix.into(),
                limit: usize::MAX,
                initial,
                maximum: maximum.max(initial),
                counter: AtomicU64::new(0),
            }),
        }
    }

    /// Caps every buffer this allocator produces, regardless of the
    /// maximum requested at allocation. This is the terminal limit of
    /// an allocator chain: overflow past it is a hard failure.
    #[must_use]
    pub fn with_limit(self, limit: usize) -> Self {
        let d = &self.defaults;
        Self {
            defaults: Arc::new(FileDefaults {
                dir: d.dir.clone(),
                prefix: d.prefix.clone(),
                limit,
                initial: d.initial,
                maximum: d.maximum,
                counter: AtomicU64::new(d.counter.load(Ordering::Relaxed)),
            }),
        }
    }

    /// The terminal capacity limit.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.defaults.limit
    }

    /// The directory buffers are written under.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.defaults.dir
    }

    /// The configured file-name prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.defaults.prefix
    }

    fn next_path(&self) -> PathBuf {
        let n = self.defaults.counter.fetch_add(1, Ordering::Relaxed);
        self.defaults.dir.join(format!(
            "{}-{}-{}.buf",
            self.defaults.prefix,
            std::process::id(),
            n
        ))
    }
}

impl Allocator for FileAllocator {
    fn allocate(&self) -> Result<Box<dyn Buffer>> {
        self.allocate_with(self.defaults.initial, self.defaults.maximum)
    }

    fn allocate_with(&self, initial: usize, maximum: usize) -> Result<Box<dyn Buffer>> {
        Ok(Box::new(FileBuffer::new(self.clone(), initial, maximum)))
    }
}

impl std::fmt::Debug for FileAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileAllocator")
            .field("dir", &self.defaults.dir)
            .field("prefix", &self.defaults.prefix)
            .field("limit", &self.defaults.limit)
            .finish()
    }
}

/// A buffer streaming its content to one temp file.
///
/// The file is created on the first append; until then the buffer costs
/// nothing on disk. `clear` only resets the logical length — the next
/// append overwrites from the start, and reads are bounded by the
/// logical length, so no truncation syscall sits on the hot path.
pub struct FileBuffer {
    path: PathBuf,
    file: Option<File>,
    length: usize,
    maximum: usize,
    chain: FileAllocator,
}

impl FileBuffer {
    fn new(chain: FileAllocator, _initial: usize, maximum: usize) -> Self {
        // The initial capacity only sizes memory tiers; a file grows by
        // writing.
        let maximum = maximum.min(chain.limit());
        Self {
            path: chain.next_path(),
            file: None,
            length: 0,
            maximum,
            chain,
        }
    }

    /// Path of the backing file. The file exists only once something
    /// was appended.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the backing file. The explicit-close complement to the
    /// background sweep.
    pub fn close(mut self) -> Result<()> {
        if self.file.take().is_some() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn writer(&mut self) -> Result<&mut File> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create_new(true)
                .read(true)
                .write(true)
                .open(&self.path)
                .map_err(|source| CoreError::DiskAllocation { source })?;
            self.file = Some(file);
        }
        Ok(self.file.as_mut().expect("file present after creation"))
    }
}

impl Buffer for FileBuffer {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let requested = self.length + data.len();
        if requested > self.maximum {
            return Err(CoreError::CapacityExceeded {
                requested,
                maximum: self.maximum,
            });
        }

        let created_now = self.file.is_none();
        let offset = self.length as u64;
        let result = self.writer().and_then(|file| {
            file.seek(SeekFrom::Start(offset))
                .and_then(|_| file.write_all(data))
                .map_err(|source| CoreError::DiskAllocation { source })
        });

        match result {
            Ok(()) => {
                self.length = requested;
                Ok(())
            }
            Err(err) => {
                // Do not leak a file holding nothing the caller owns.
                if created_now {
                    self.file = None;
                    let _ = std::fs::remove_file(&self.path);
                }
                Err(err)
            }
        }
    }

    fn length(&self) -> usize {
        self.length
    }

    fn open(&self) -> Result<Box<dyn Read + Send>> {
        if self.file.is_none() {
            return Ok(Box::new(Cursor::new(Vec::new())));
        }
        let reader = File::open(&self.path).map_err(CoreError::from)?;
        Ok(Box::new(reader.take(self.length as u64)))
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.length);
        self.open()?.read_to_end(&mut out).map_err(CoreError::from)?;
        Ok(out)
    }

    fn clear(&mut self) -> Result<()> {
        self.length = 0;
        Ok(())
    }

    fn allocate(&self) -> Result<Box<dyn Buffer>> {
        self.chain.allocate()
    }
}

impl std::fmt::Debug for FileBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBuffer")
            .field("path", &self.path)
            .field("length", &self.length)
            .field("maximum", &self.maximum)
            .field("created", &self.file.is_some())
            .finish()
    }
}
