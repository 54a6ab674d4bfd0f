// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::ffi::CString;
use std::io;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use bytes::BytesMut;

/// Creates a non-blocking change-notification descriptor.
pub(crate) fn new() -> io::Result<OwnedFd> {
    // SAFETY: No pointer arguments.
    let fd = unsafe { libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: inotify_init1 returned a fresh descriptor that nothing else owns.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Adds (or updates) the watch for one directory. Returns the watch handle.
pub(crate) fn add_watch(fd: RawFd, path: &Path, mask: u32) -> io::Result<i32> {
    let path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))?;

    // SAFETY: The path string outlives the call.
    let wd = unsafe { libc::inotify_add_watch(fd, path.as_ptr(), mask) };
    if wd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(wd)
}

pub(crate) fn remove_watch(fd: RawFd, wd: i32) {
    // SAFETY: No pointer arguments. A stale watch handle is harmless here;
    // the kernel reports EINVAL which we have no use for during disarm.
    let _ = unsafe { libc::inotify_rm_watch(fd, wd) };
}

/// Drains available change records into the spare capacity of `buffer`,
/// growing its length by the number of bytes transferred. The buffer then
/// holds raw, platform-shaped change records; parsing them is the caller's
/// concern.
pub(crate) fn read_events(fd: RawFd, buffer: &mut BytesMut) -> io::Result<usize> {
    let spare = buffer.spare_capacity_mut();

    // SAFETY: The spare-capacity region outlives the call and the kernel
    // writes at most `spare.len()` bytes into it.
    let n = unsafe { libc::read(fd, spare.as_mut_ptr().cast(), spare.len()) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    let n = usize::try_from(n).unwrap_or(0);
    // SAFETY: The kernel initialized exactly `n` bytes past the current length.
    unsafe { buffer.set_len(buffer.len() + n) };
    Ok(n)
}

#[cfg(test)]
mod tests {
    use std::os::fd::AsRawFd;

    use super::*;
    use crate::pal::{Interest, poll};

    #[test]
    fn watched_directory_reports_creation() {
        let dir = tempfile::tempdir().unwrap();
        let fd = new().unwrap();
        add_watch(fd.as_raw_fd(), dir.path(), libc::IN_CREATE).unwrap();

        std::fs::write(dir.path().join("fresh.txt"), b"x").unwrap();

        let ready = poll::probe(fd.as_raw_fd(), Interest::READABLE).unwrap();
        assert!(ready.readable);

        let mut buffer = BytesMut::with_capacity(4096);
        let n = read_events(fd.as_raw_fd(), &mut buffer).unwrap();
        assert!(n > 0);
        assert_eq!(buffer.len(), n);
    }
}
