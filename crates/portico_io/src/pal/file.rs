// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::BytesMut;

fn check(rc: libc::c_int) -> io::Result<()> {
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn check_len(rc: isize) -> io::Result<usize> {
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(usize::try_from(rc).unwrap_or(0))
}

fn c_path(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))
}

pub(crate) fn open(path: &Path, flags: libc::c_int, mode: libc::mode_t) -> io::Result<OwnedFd> {
    let path = c_path(path)?;

    // SAFETY: The path string outlives the call.
    let fd = unsafe { libc::open(path.as_ptr(), flags | libc::O_CLOEXEC, libc::c_uint::from(mode)) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: open() returned a fresh descriptor that nothing else owns.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Reads into the spare capacity of `buffer` at an explicit offset, growing
/// its length by the number of bytes transferred. Reading at or past the end
/// of the file transfers zero bytes and is not an error.
pub(crate) fn read_at(fd: RawFd, buffer: &mut BytesMut, offset: u64) -> io::Result<usize> {
    let spare = buffer.spare_capacity_mut();

    // SAFETY: The spare-capacity region outlives the call and the kernel
    // writes at most `spare.len()` bytes into it.
    let n = check_len(unsafe {
        libc::pread(
            fd,
            spare.as_mut_ptr().cast(),
            spare.len(),
            libc::off_t::try_from(offset).unwrap_or(libc::off_t::MAX),
        )
    })?;

    // SAFETY: The kernel initialized exactly `n` bytes past the current length.
    unsafe { buffer.set_len(buffer.len() + n) };
    Ok(n)
}

pub(crate) fn write_at(fd: RawFd, data: &[u8], offset: u64) -> io::Result<usize> {
    // SAFETY: The data slice outlives the call and the length matches.
    check_len(unsafe {
        libc::pwrite(
            fd,
            data.as_ptr().cast(),
            data.len(),
            libc::off_t::try_from(offset).unwrap_or(libc::off_t::MAX),
        )
    })
}

pub(crate) fn size(fd: RawFd) -> io::Result<u64> {
    // SAFETY: stat is a plain-old-data struct; all-zeroes is valid.
    let mut stat: libc::stat = unsafe { mem::zeroed() };

    // SAFETY: The stat buffer outlives the call.
    check(unsafe { libc::fstat(fd, &raw mut stat) })?;
    Ok(u64::try_from(stat.st_size).unwrap_or(0))
}

pub(crate) fn set_size(fd: RawFd, size: u64) -> io::Result<()> {
    // SAFETY: No pointer arguments.
    check(unsafe {
        libc::ftruncate(fd, libc::off_t::try_from(size).unwrap_or(libc::off_t::MAX))
    })
}

pub(crate) fn flush(fd: RawFd) -> io::Result<()> {
    // SAFETY: No pointer arguments.
    check(unsafe { libc::fsync(fd) })
}

fn flock(range_offset: u64, range_len: u64, kind: libc::c_short) -> libc::flock {
    // SAFETY: flock is a plain-old-data struct; all-zeroes is valid.
    let mut lock: libc::flock = unsafe { mem::zeroed() };
    lock.l_type = kind;
    lock.l_whence = libc::c_short::try_from(libc::SEEK_SET).unwrap_or(0);
    lock.l_start = libc::off_t::try_from(range_offset).unwrap_or(libc::off_t::MAX);
    lock.l_len = libc::off_t::try_from(range_len).unwrap_or(libc::off_t::MAX);
    lock
}

/// Takes a byte-range lock on the open file description. With `wait` the call
/// blocks until the range is free; without it a held range fails immediately
/// with `EAGAIN`/`EACCES`.
///
/// Open-file-description locks are used so that two handles to the same file
/// within one process still conflict, matching the per-handle semantics of
/// the byte-range lock contract.
pub(crate) fn lock(
    fd: RawFd,
    range_offset: u64,
    range_len: u64,
    exclusive: bool,
    wait: bool,
) -> io::Result<()> {
    let kind = if exclusive { libc::F_WRLCK } else { libc::F_RDLCK };
    let lock = flock(range_offset, range_len, libc::c_short::try_from(kind).unwrap_or(0));
    let command = if wait { libc::F_OFD_SETLKW } else { libc::F_OFD_SETLK };

    // SAFETY: The flock struct outlives the call.
    check(unsafe { libc::fcntl(fd, command, &raw const lock) })
}

pub(crate) fn unlock(fd: RawFd, range_offset: u64, range_len: u64) -> io::Result<()> {
    let lock = flock(
        range_offset,
        range_len,
        libc::c_short::try_from(libc::F_UNLCK).unwrap_or(0),
    );

    // SAFETY: The flock struct outlives the call.
    check(unsafe { libc::fcntl(fd, libc::F_OFD_SETLK, &raw const lock) })
}

/// Whether a lock held by another open file description denies the given
/// access to the range. `exclusive_probe` asks "could I write?", otherwise
/// "could I read?".
pub(crate) fn lock_conflicts(
    fd: RawFd,
    range_offset: u64,
    range_len: u64,
    exclusive_probe: bool,
) -> io::Result<bool> {
    let kind = if exclusive_probe { libc::F_WRLCK } else { libc::F_RDLCK };
    let mut lock = flock(range_offset, range_len, libc::c_short::try_from(kind).unwrap_or(0));

    // SAFETY: The flock struct outlives the call; the kernel rewrites it with
    // the first conflicting lock, or sets l_type to F_UNLCK if none exists.
    check(unsafe { libc::fcntl(fd, libc::F_OFD_GETLK, &raw mut lock) })?;
    Ok(libc::c_int::from(lock.l_type) != libc::F_UNLCK)
}

fn timespec_to_system_time(seconds: libc::time_t, nanos: libc::c_long) -> SystemTime {
    let duration = Duration::new(
        u64::try_from(seconds).unwrap_or(0),
        u32::try_from(nanos).unwrap_or(0),
    );
    UNIX_EPOCH + duration
}

/// Last-access and last-write timestamps of the open file.
pub(crate) fn times(fd: RawFd) -> io::Result<(SystemTime, SystemTime)> {
    // SAFETY: stat is a plain-old-data struct; all-zeroes is valid.
    let mut stat: libc::stat = unsafe { mem::zeroed() };

    // SAFETY: The stat buffer outlives the call.
    check(unsafe { libc::fstat(fd, &raw mut stat) })?;
    Ok((
        timespec_to_system_time(stat.st_atime, stat.st_atime_nsec),
        timespec_to_system_time(stat.st_mtime, stat.st_mtime_nsec),
    ))
}

fn system_time_to_timespec(time: Option<SystemTime>) -> libc::timespec {
    match time {
        Some(time) => {
            let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
            libc::timespec {
                tv_sec: libc::time_t::try_from(since_epoch.as_secs()).unwrap_or(libc::time_t::MAX),
                tv_nsec: libc::c_long::from(since_epoch.subsec_nanos()),
            }
        }
        None => libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_OMIT,
        },
    }
}

/// Overwrites the last-access and/or last-write timestamps; `None` leaves a
/// timestamp untouched.
pub(crate) fn set_times(
    fd: RawFd,
    accessed: Option<SystemTime>,
    modified: Option<SystemTime>,
) -> io::Result<()> {
    let times = [
        system_time_to_timespec(accessed),
        system_time_to_timespec(modified),
    ];

    // SAFETY: The two-element array outlives the call, as futimens requires.
    check(unsafe { libc::futimens(fd, times.as_ptr()) })
}

#[cfg(test)]
mod tests {
    use std::os::fd::AsRawFd;

    use super::*;

    fn scratch_file() -> (tempfile::TempDir, OwnedFd) {
        let dir = tempfile::tempdir().unwrap();
        let fd = open(
            &dir.path().join("scratch.bin"),
            libc::O_RDWR | libc::O_CREAT,
            0o644,
        )
        .unwrap();
        (dir, fd)
    }

    #[test]
    fn read_past_end_transfers_nothing() {
        let (_dir, fd) = scratch_file();
        write_at(fd.as_raw_fd(), b"hello", 0).unwrap();

        let mut buffer = BytesMut::with_capacity(16);
        let n = read_at(fd.as_raw_fd(), &mut buffer, 100).unwrap();
        assert_eq!(n, 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn straddling_read_is_clamped_to_file_length() {
        let (_dir, fd) = scratch_file();
        write_at(fd.as_raw_fd(), b"0123456789", 0).unwrap();

        let mut buffer = BytesMut::with_capacity(16);
        let n = read_at(fd.as_raw_fd(), &mut buffer, 7).unwrap();
        assert_eq!(n, 3);
        assert_eq!(&buffer[..], b"789");
    }

    #[test]
    fn ofd_locks_conflict_across_descriptions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locked.bin");
        let first = open(&path, libc::O_RDWR | libc::O_CREAT, 0o644).unwrap();
        let second = open(&path, libc::O_RDWR, 0o644).unwrap();

        lock(first.as_raw_fd(), 0, 64, true, false).unwrap();
        assert!(lock_conflicts(second.as_raw_fd(), 0, 64, false).unwrap());
        assert!(lock(second.as_raw_fd(), 0, 64, true, false).is_err());

        unlock(first.as_raw_fd(), 0, 64).unwrap();
        assert!(!lock_conflicts(second.as_raw_fd(), 0, 64, false).unwrap());
        lock(second.as_raw_fd(), 0, 64, true, false).unwrap();
    }

    #[test]
    fn lock_beyond_end_of_file_does_not_extend_it() {
        let (_dir, fd) = scratch_file();
        write_at(fd.as_raw_fd(), b"abc", 0).unwrap();

        lock(fd.as_raw_fd(), 1024, 64, true, false).unwrap();
        assert_eq!(size(fd.as_raw_fd()).unwrap(), 3);
        unlock(fd.as_raw_fd(), 1024, 64).unwrap();
    }

    #[test]
    fn timestamps_round_trip_through_set() {
        let (_dir, fd) = scratch_file();
        let stamp = UNIX_EPOCH + Duration::from_secs(1_500_000_000);

        set_times(fd.as_raw_fd(), Some(stamp), Some(stamp)).unwrap();
        let (accessed, modified) = times(fd.as_raw_fd()).unwrap();
        assert_eq!(accessed, stamp);
        assert_eq!(modified, stamp);
    }
}
