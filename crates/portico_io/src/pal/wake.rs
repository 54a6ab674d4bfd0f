// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// A self-pipe used to interrupt a thread that is blocked in a readiness wait
/// on behalf of a synchronous operation.
///
/// Every transport object owns one. `cancel()` (and teardown) signal it so
/// that a synchronous wrapper blocked in [`poll::wait`][1] observes the
/// cancellation promptly instead of running out its timeout.
///
/// [1]: super::poll::wait
#[derive(Debug)]
pub(crate) struct WakePipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl WakePipe {
    pub(crate) fn new() -> io::Result<Self> {
        let mut fds = [0; 2];

        // SAFETY: The array outlives the call and has room for both ends.
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: pipe2 returned two fresh descriptors that nothing else owns.
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        Ok(Self { read, write })
    }

    /// The descriptor a waiter polls for readability.
    pub(crate) fn wait_fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }

    /// Signals all current and future waiters. Safe to call from any thread;
    /// a full pipe already counts as signaled.
    pub(crate) fn signal(&self) {
        let byte = [1_u8];

        // SAFETY: The one-byte buffer outlives the call. A short or failed
        // write is fine: EAGAIN means the pipe is already signaled.
        let _ = unsafe { libc::write(self.write.as_raw_fd(), byte.as_ptr().cast(), 1) };
    }

    /// Consumes any pending signal so the next wait does not spin.
    pub(crate) fn drain(&self) {
        let mut sink = [0_u8; 64];
        loop {
            // SAFETY: The buffer outlives the call and the length matches.
            let n = unsafe {
                libc::read(self.read.as_raw_fd(), sink.as_mut_ptr().cast(), sink.len())
            };
            if n <= 0 {
                return;
            }
        }
    }
}
