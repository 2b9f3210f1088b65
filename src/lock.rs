//! Advisory lock on the data directory.
//!
//! Held while the database is opened, so only one vocab process at a time
//! runs the startup migration of the derived indexes.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

const LOCK_FILE_NAME: &str = "vocab.lock";

/// Exclusive flock on `<base>/vocab.lock`, released on drop.
pub struct FileLock {
    #[allow(dead_code)]
    file: File,
}

impl FileLock {
    /// With `wait` unset, fails with `WouldBlock` when another process
    /// holds the lock.
    pub fn acquire(base_path: &Path, wait: bool) -> io::Result<Self> {
        std::fs::create_dir_all(base_path)?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(base_path.join(LOCK_FILE_NAME))?;

        flock(&file, wait)?;
        Ok(FileLock { file })
    }
}

#[cfg(unix)]
fn flock(file: &File, wait: bool) -> io::Result<()> {
    let op = if wait {
        libc::LOCK_EX
    } else {
        libc::LOCK_EX | libc::LOCK_NB
    };

    if unsafe { libc::flock(file.as_raw_fd(), op) } == 0 {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::EWOULDBLOCK || code == libc::EAGAIN => Err(io::Error::new(
            io::ErrorKind::WouldBlock,
            "data directory is locked by another vocab process",
        )),
        _ => Err(err),
    }
}

#[cfg(not(unix))]
fn flock(_file: &File, _wait: bool) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
impl Drop for FileLock {
    fn drop(&mut self) {
        // nothing to report from drop
        unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
    }
}
