//! Output-directory lock serializing runs for the same name+version.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use log::debug;
use serde::Deserialize;

use crate::error::{IoResultExt, PipelineError, Result};

/// Directory holding lock files under the output root.
pub const LOCKS_DIR: &str = ".locks";

/// What to do when another run already holds the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// Refuse immediately with [`PipelineError::Locked`].
    #[default]
    Fail,
    /// Block until the holder finishes.
    Wait,
}

/// Exclusive lock over one name+version's output paths.
///
/// Held for the whole run; released on drop.
#[derive(Debug)]
pub struct OutputLock {
    file: File,
    path: PathBuf,
}

impl OutputLock {
    /// `<output>/.locks/<name>-<version>.lock`
    pub fn path_for(output_dir: &Path, name_version: &str) -> PathBuf {
        output_dir.join(LOCKS_DIR).join(format!("{name_version}.lock"))
    }

    pub fn acquire(output_dir: &Path, name_version: &str, mode: LockMode) -> Result<Self> {
        let path = Self::path_for(output_dir, name_version);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).at_path(parent)?;
        }

        // Lock files are never unlinked: removing a held lock file would let a
        // second process lock a fresh inode at the same path.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .at_path(&path)?;

        match mode {
            LockMode::Fail => {
                if file.try_lock_exclusive().is_err() {
                    return Err(PipelineError::Locked { path });
                }
            }
            LockMode::Wait => {
                debug!("waiting for {}", path.display());
                file.lock_exclusive().at_path(&path)?;
            }
        }

        debug!("acquired {}", path.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for OutputLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_is_refused() {
        let tmp = TempDir::new().unwrap();
        let held = OutputLock::acquire(tmp.path(), "rust-dnf-0.1.0", LockMode::Fail).unwrap();

        let err = OutputLock::acquire(tmp.path(), "rust-dnf-0.1.0", LockMode::Fail).unwrap_err();
        assert!(matches!(err, PipelineError::Locked { .. }), "{err}");

        drop(held);
        OutputLock::acquire(tmp.path(), "rust-dnf-0.1.0", LockMode::Fail).unwrap();
    }

    #[test]
    fn test_distinct_versions_do_not_contend() {
        let tmp = TempDir::new().unwrap();
        let _a = OutputLock::acquire(tmp.path(), "rust-dnf-0.1.0", LockMode::Fail).unwrap();
        let _b = OutputLock::acquire(tmp.path(), "rust-dnf-0.2.0", LockMode::Fail).unwrap();
    }

    #[test]
    fn test_wait_mode_blocks_until_release() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().to_path_buf();
        let held = OutputLock::acquire(&dir, "tool-1", LockMode::Fail).unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter = thread::spawn(move || {
            let lock = OutputLock::acquire(&dir, "tool-1", LockMode::Wait).unwrap();
            tx.send(()).unwrap();
            drop(lock);
        });

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        drop(held);
        rx.recv_timeout(Duration::from_secs(10)).unwrap();
        waiter.join().unwrap();
        assert!(OutputLock::path_for(tmp.path(), "tool-1").exists());
    }
}
