//! File-based locking for single-writer safety.
//!
//! Cross-platform (fs2) advisory lock на <cbmdir>/LOCK:
//! - Exclusive берёт писатель CBM; второй писатель на том же каталоге
//!   не стартует.
//! - Читатели (merge/recycle) замок не берут: sealed-файлы неизменяемы.
//!
//! Lock is released on Drop.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::consts::LOCK_FILE;

pub struct LockGuard {
    file: std::fs::File,
    path: PathBuf,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // fs2 unlock errors on drop are ignored deliberately.
        let _ = self.file.unlock();
    }
}

fn lock_file_path(dir: &Path) -> PathBuf {
    dir.join(LOCK_FILE)
}

fn open_lock_file(dir: &Path) -> Result<std::fs::File> {
    let path = lock_file_path(dir);
    let f = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&path)
        .with_context(|| format!("open lock file {}", path.display()))?;
    Ok(f)
}

/// Acquire the writer lock. Blocks until acquired.
pub fn acquire_writer_lock(dir: &Path) -> Result<LockGuard> {
    let file = open_lock_file(dir)?;
    file.lock_exclusive()
        .with_context(|| format!("lock_exclusive {}", lock_file_path(dir).display()))?;
    Ok(LockGuard {
        file,
        path: lock_file_path(dir),
    })
}

/// Try to acquire the writer lock. Returns Err if another writer holds it.
pub fn try_acquire_writer_lock(dir: &Path) -> Result<LockGuard> {
    let file = open_lock_file(dir)?;
    file.try_lock_exclusive().with_context(|| {
        format!(
            "try_lock_exclusive failed: {}",
            lock_file_path(dir).display()
        )
    })?;
    Ok(LockGuard {
        file,
        path: lock_file_path(dir),
    })
}
