use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{IoContext, ProvisionError};

pub const LOCK_FILE: &str = ".lock";

/// Exclusive advisory lock over one image directory, released on drop.
#[derive(Debug)]
pub struct CacheLock {
    file: File,
    path: PathBuf,
}

impl CacheLock {
    pub fn acquire(dir: &Path) -> Result<Self, ProvisionError> {
        fs::create_dir_all(dir).io_context(|| format!("create {}", dir.display()))?;
        let path = dir.join(LOCK_FILE);

        // The lock file is never unlinked: removing a held lock lets a second
        // run lock a fresh inode at the same path.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .io_context(|| format!("open {}", path.display()))?;

        if let Err(err) = FileExt::try_lock_exclusive(&file) {
            if err.kind() == fs2::lock_contended_error().kind() {
                return Err(ProvisionError::CacheLocked { path });
            }
            return Err(ProvisionError::Io {
                context: format!("lock {}", path.display()),
                source: err,
            });
        }

        tracing::debug!("locked {}", path.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
