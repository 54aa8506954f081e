//! Advisory lock giving one process exclusive ownership of a directory

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Name of the lock file created inside the locked directory
pub const LOCK_FILE_NAME: &str = ".outbox.lock";

/// Exclusive ownership of a directory, released on drop
///
/// The lock is an `flock`-style advisory lock, so the operating system drops
/// it when the owning process exits and a stale lock file never blocks a
/// restart.
#[derive(Debug)]
pub struct DirectoryLock {
    lock_file: File,
    lock_path: PathBuf,
    directory: PathBuf,
}

impl DirectoryLock {
    /// Try to acquire the lock, creating the directory if needed
    ///
    /// Fails with [`io::ErrorKind::WouldBlock`] when another owner holds it.
    pub fn try_acquire(directory: &Path) -> io::Result<Self> {
        fs::create_dir_all(directory)?;
        let lock_path = directory.join(LOCK_FILE_NAME);

        let mut lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        match lock_file.try_lock_exclusive() {
            Ok(()) => {
                lock_file.set_len(0)?;
                writeln!(lock_file, "{}", std::process::id())?;
                lock_file.sync_all()?;

                tracing::debug!(directory = %directory.display(), "Acquired directory lock");
                Ok(Self {
                    lock_file,
                    lock_path,
                    directory: directory.to_path_buf(),
                })
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || is_contended(&e) => {
                Err(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    format!("directory already locked: {}", directory.display()),
                ))
            }
            Err(e) => Err(e),
        }
    }

    /// Get the directory this lock is for
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the lock file itself
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for DirectoryLock {
    fn drop(&mut self) {
        // The file stays behind; removing it would race a concurrent acquirer
        let _ = FileExt::unlock(&self.lock_file);
    }
}

fn is_contended(error: &io::Error) -> bool {
    error.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_directory_lock_exclusive() {
        let temp_dir = TempDir::new().unwrap();
        let dir_path = temp_dir.path().join("outbox");

        let lock1 = DirectoryLock::try_acquire(&dir_path).unwrap();
        assert!(dir_path.join(LOCK_FILE_NAME).exists());
        assert_eq!(lock1.directory(), dir_path.as_path());

        let lock2 = DirectoryLock::try_acquire(&dir_path);
        assert_eq!(lock2.unwrap_err().kind(), io::ErrorKind::WouldBlock);

        drop(lock1);

        let lock3 = DirectoryLock::try_acquire(&dir_path).unwrap();
        drop(lock3);
    }
}
