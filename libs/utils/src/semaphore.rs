//! Named binary semaphores used to serialize access to a single named
//! resource across processes.
//!
//! Exactly one process may hold a given named semaphore at a time, used by
//! the input supervisor to enforce single-writer-per-stream. Backed by
//! POSIX `sem_open`/`sem_trywait`/`sem_post`/`sem_close`/`sem_unlink`.

use std::ffi::CString;
use std::io;
use std::ptr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SemaphoreError {
    #[error("semaphore name {0:?} is not representable as a C string")]
    InvalidName(String),
    #[error("sem_open failed: {0}")]
    Open(io::Error),
}

/// A named, process-shared binary semaphore.
///
/// Dropping the handle closes it but does not unlink it; call
/// [`NamedSemaphore::unlink`] explicitly on the exit path that owns the
/// semaphore's lifetime, matching the original release-then-unlink sequence.
pub struct NamedSemaphore {
    name: CString,
    // SAFETY invariant: `handle` is either `libc::SEM_FAILED` (never stored
    // past construction, we bail out instead) or a valid `sem_t*` obtained
    // from `sem_open` that has not yet been passed to `sem_close`.
    handle: *mut libc::sem_t,
}

// The underlying `sem_t*` is safe to move and use from a different thread
// than the one that opened it; POSIX named semaphores are designed for
// cross-process sharing.
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    /// Open (creating if necessary) a named semaphore initialized to 1
    /// (unlocked), mirroring `sem_open(name, O_CREAT | O_RDWR, ACCESSPERMS, 1)`.
    pub fn open(name: &str) -> Result<Self, SemaphoreError> {
        let cname = CString::new(name).map_err(|_| SemaphoreError::InvalidName(name.into()))?;
        // SAFETY: `cname` is a valid NUL-terminated C string for the
        // duration of this call; we check the returned pointer for the
        // sentinel failure value before using it.
        let handle = unsafe {
            libc::sem_open(
                cname.as_ptr(),
                libc::O_CREAT | libc::O_RDWR,
                0o666u32,
                1u32,
            )
        };
        if handle == libc::SEM_FAILED as *mut libc::sem_t {
            return Err(SemaphoreError::Open(io::Error::last_os_error()));
        }
        Ok(NamedSemaphore {
            name: cname,
            handle,
        })
    }

    /// Non-blocking acquire. Returns `true` if the semaphore was acquired.
    pub fn try_wait(&self) -> bool {
        // SAFETY: `self.handle` is a live `sem_t*` for the lifetime of `self`.
        let rc = unsafe { libc::sem_trywait(self.handle) };
        rc == 0
    }

    /// Release the semaphore (post).
    pub fn post(&self) {
        // SAFETY: `self.handle` is a live `sem_t*` for the lifetime of `self`.
        unsafe {
            libc::sem_post(self.handle);
        }
    }

    /// Remove the semaphore's name from the system, so a later `open` with
    /// the same name starts fresh. Must be called by the owning process on
    /// every exit path.
    pub fn unlink(&self) {
        // SAFETY: `self.name` is a valid NUL-terminated C string.
        unsafe {
            libc::sem_unlink(self.name.as_ptr());
        }
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        if self.handle != ptr::null_mut() {
            // SAFETY: `self.handle` was obtained from `sem_open` and has not
            // been closed yet; this is the only place that closes it.
            unsafe {
                libc::sem_close(self.handle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_owner_is_enforced() {
        let name = format!("/utils-test-sem-{}", std::process::id());
        let a = NamedSemaphore::open(&name).unwrap();
        assert!(a.try_wait());
        let b = NamedSemaphore::open(&name).unwrap();
        assert!(!b.try_wait(), "second tryWait must fail while held");
        a.post();
        assert!(b.try_wait(), "post must release it for the next waiter");
        b.post();
        a.unlink();
    }
}
