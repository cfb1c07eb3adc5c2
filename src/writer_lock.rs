use std::fs::File;

use crate::Result;

/// Takes an exclusive, non-blocking advisory lock on `file`.
///
/// Returns `Ok(false)` when another handle already holds the lock. The lock is
/// released when the file descriptor is closed.
#[cfg(unix)]
pub(crate) fn try_lock(file: &File) -> Result<bool> {
    use std::os::unix::io::AsRawFd;

    let res = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if res == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.kind() == std::io::ErrorKind::WouldBlock {
        return Ok(false);
    }
    Err(err.into())
}

#[cfg(not(unix))]
pub(crate) fn try_lock(_file: &File) -> Result<bool> {
    Ok(true)
}
