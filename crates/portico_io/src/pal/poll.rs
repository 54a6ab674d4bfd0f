// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// The readiness a parked operation is waiting for.
///
/// Accept, receive and receive-from operations wait for readability; connect,
/// send and send-to operations wait for writability. The union of all parked
/// operations on one descriptor determines its poller registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Interest {
    pub(crate) readable: bool,
    pub(crate) writable: bool,
}

impl Interest {
    pub(crate) const READABLE: Self = Self {
        readable: true,
        writable: false,
    };

    pub(crate) const WRITABLE: Self = Self {
        readable: false,
        writable: true,
    };

    pub(crate) const fn union(self, other: Self) -> Self {
        Self {
            readable: self.readable || other.readable,
            writable: self.writable || other.writable,
        }
    }

    pub(crate) const fn is_none(self) -> bool {
        !self.readable && !self.writable
    }

    const fn poll_events(self) -> i16 {
        let mut events = 0;
        if self.readable {
            events |= libc::POLLIN;
        }
        if self.writable {
            events |= libc::POLLOUT;
        }
        events
    }
}

fn timeout_to_millis(timeout: Option<Duration>) -> i32 {
    match timeout {
        // Clamp to the poll(2) argument range; a wait this long is
        // indistinguishable from infinite for our callers anyway.
        Some(t) => i32::try_from(t.as_millis()).unwrap_or(i32::MAX),
        None => -1,
    }
}

/// Waits until `fd` reaches the requested readiness, `wake` becomes readable
/// (the cancellation signal of the owning transport) or the timeout elapses.
///
/// Passing no descriptor waits on the wake pipe alone, which is what
/// always-synchronous transports (files, byte-range locks) do while their
/// completion channel is drained.
pub(crate) fn wait(
    fd: Option<(RawFd, Interest)>,
    wake: RawFd,
    timeout: Option<Duration>,
) -> io::Result<()> {
    let mut fds = [
        libc::pollfd {
            fd: wake,
            events: libc::POLLIN,
            revents: 0,
        },
        libc::pollfd {
            fd: -1,
            events: 0,
            revents: 0,
        },
    ];

    let mut count: libc::nfds_t = 1;
    if let Some((fd, interest)) = fd {
        fds[1] = libc::pollfd {
            fd,
            events: interest.poll_events(),
            revents: 0,
        };
        count = 2;
    }

    // SAFETY: The pollfd array outlives the call and `count` never exceeds
    // its length.
    let rc = unsafe { libc::poll(fds.as_mut_ptr(), count, timeout_to_millis(timeout)) };
    if rc < 0 {
        let error = io::Error::last_os_error();
        if super::is_interrupted(&error) {
            return Ok(());
        }
        return Err(error);
    }

    Ok(())
}

/// Probes the current readiness of a descriptor without blocking.
pub(crate) fn probe(fd: RawFd, interest: Interest) -> io::Result<Interest> {
    let mut pollfd = libc::pollfd {
        fd,
        events: interest.poll_events(),
        revents: 0,
    };

    // SAFETY: The pollfd outlives the call.
    let rc = unsafe { libc::poll(&raw mut pollfd, 1, 0) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(Interest {
        readable: pollfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0,
        writable: pollfd.revents & (libc::POLLOUT | libc::POLLHUP | libc::POLLERR) != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interest_union_combines_directions() {
        let both = Interest::READABLE.union(Interest::WRITABLE);
        assert!(both.readable);
        assert!(both.writable);
        assert!(!Interest::default().readable);
        assert!(Interest::default().is_none());
    }

    #[test]
    fn timeout_conversion_clamps() {
        assert_eq!(timeout_to_millis(None), -1);
        assert_eq!(timeout_to_millis(Some(Duration::from_millis(250))), 250);
        assert_eq!(timeout_to_millis(Some(Duration::from_secs(u64::MAX))), i32::MAX);
    }
}
