//! Write lock and tick lock for a cache root.
//!
//! Both combine an in-process primitive with an `fs2` advisory lock on a
//! file under the root, so a worker running in a separate process
//! observes the same exclusion as threads inside one process.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use fs2::FileExt;
use tracing::trace;

use crate::error::{Error, Result};

/// Serializes every write to the artifact store, job queue and subscriber
/// registry of one cache root.
#[derive(Debug, Clone)]
pub struct WriteLock {
    inner: Arc<WriteLockInner>,
}

#[derive(Debug)]
struct WriteLockInner {
    mutex: Mutex<()>,
    path: PathBuf,
}

/// Held for the duration of a write. Released on drop.
#[derive(Debug)]
pub struct WriteGuard<'a> {
    file: File,
    _held: MutexGuard<'a, ()>,
}

impl WriteLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(WriteLockInner {
                mutex: Mutex::new(()),
                path: path.into(),
            }),
        }
    }

    /// Block until the lock is held by this thread.
    pub fn acquire(&self) -> Result<WriteGuard<'_>> {
        // A panic while holding the guard cannot leave a torn file behind
        // (writes publish by rename), so poisoning is ignored.
        let held = self
            .inner
            .mutex
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let file = open_lock_file(&self.inner.path)?;
        file.lock_exclusive()
            .map_err(|e| Error::io(&self.inner.path, e))?;
        trace!(path = %self.inner.path.display(), "write lock acquired");
        Ok(WriteGuard { file, _held: held })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Single-flight guard for worker ticks. Never blocks: a tick that cannot
/// take it is skipped.
#[derive(Debug)]
pub struct TickLock {
    busy: AtomicBool,
    path: PathBuf,
}

#[derive(Debug)]
pub struct TickGuard<'a> {
    file: File,
    busy: &'a AtomicBool,
}

impl TickLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            busy: AtomicBool::new(false),
            path: path.into(),
        }
    }

    /// `Ok(None)` when another tick (in this or another process) is running.
    pub fn try_acquire(&self) -> Result<Option<TickGuard<'_>>> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(None);
        }

        let file = match open_lock_file(&self.path) {
            Ok(file) => file,
            Err(e) => {
                self.busy.store(false, Ordering::Release);
                return Err(e);
            }
        };
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(TickGuard {
                file,
                busy: &self.busy,
            })),
            Err(e) => {
                self.busy.store(false, Ordering::Release);
                let contended = e.kind() == ErrorKind::WouldBlock
                    || e.raw_os_error() == fs2::lock_contended_error().raw_os_error();
                if contended {
                    Ok(None)
                } else {
                    Err(Error::io(&self.path, e))
                }
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        self.busy.store(false, Ordering::Release);
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| Error::io(path, e))
}
