// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use bytes::BytesMut;
use tracing::{Level, event};

use crate::bridge::{self, SyncOutcome};
use crate::pal;
use crate::pending::{OpContext, PendingOps, Route};
use crate::proactor::{Association, deliver_one};
use crate::{
    Error, FileContext, FileOp, IssueResult, LockMode, LockRange, Proactor, Rejected, Result,
};

/// How far a lock-wait retry backs off before probing the range again.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// How the stream may access the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAccess {
    /// Read-only.
    Read,
    /// Write-only.
    Write,
    /// Read and write.
    ReadWrite,
}

bitflags::bitflags! {
    /// What concurrent access other handles may have while this stream is
    /// open. Recorded for API compatibility; the platform does not enforce
    /// it, so it is advisory here.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileShare: u32 {
        /// Others may read.
        const READ = 0b001;
        /// Others may write.
        const WRITE = 0b010;
        /// Others may delete.
        const DELETE = 0b100;
    }
}

/// What to do about an existing (or missing) file at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// Create; fail if the file already exists.
    CreateNew,
    /// Create, truncating any existing file.
    Create,
    /// Open an existing file; fail if it does not exist.
    Open,
    /// Open if present, create otherwise.
    OpenOrCreate,
    /// Open an existing file and truncate it.
    Truncate,
    /// Open or create, then position at the end of the file.
    Append,
}

bitflags::bitflags! {
    /// Attributes applied when the open creates the file. Beyond the
    /// read-only bit these are advisory on this platform.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FileAttributes: u32 {
        /// The created file rejects writes through later opens.
        const READ_ONLY = 0b01;
        /// The file is scratch data that need not survive the process.
        const TEMPORARY = 0b10;
    }
}

bitflags::bitflags! {
    /// Behavioral options of the open handle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FileOptions: u32 {
        /// Writes reach the device before completing.
        const WRITE_THROUGH = 0b01;
        /// The file is removed from the namespace once this stream closes.
        const DELETE_ON_CLOSE = 0b10;
    }
}

/// Where a seek is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    /// From the start of the file.
    Begin,
    /// From the current position.
    Current,
    /// From the end of the file.
    End,
}

/// A file opened for offset-addressed I/O, byte-range locking and metadata
/// access, with the same dual synchronous/asynchronous contract as the other
/// transports.
///
/// Reads and writes come in offset-explicit and current-position forms. The
/// current position is tracked by the stream itself, not by the kernel: a
/// current-position operation reads the position, performs the offset
/// operation, and advances the position by the transferred count.
///
/// Byte-range locks default to exclusive and fail-immediately. Locking
/// beyond the end of the file is legal and does not extend the file. While a
/// range is locked, reads and writes of that range through *other* handles
/// fail with [`Error::LockViolation`]; the lock holder itself is unaffected.
///
/// Reading at or past the end of the file completes with zero bytes
/// transferred rather than erroring, and a read straddling the end returns
/// only the in-bounds portion.
///
/// File operations always finish at issue time; the asynchronous forms exist
/// for contract uniformity and deliver through the associated reactor like
/// any other completion.
///
/// # Thread safety
///
/// This type is thread-safe.
#[derive(Debug)]
pub struct FileStream {
    shared: Arc<FileShared>,
}

#[derive(Debug)]
struct FileShared {
    fd: Mutex<Option<OwnedFd>>,
    position: AtomicU64,
    share: FileShare,
    pending: Arc<PendingOps>,
    wake: pal::WakePipe,
    assoc: Mutex<Option<Arc<Association>>>,
}

impl FileStream {
    /// Opens (or creates) the file at `path`.
    ///
    /// For every mode except [`FileMode::Open`], missing parent directories
    /// are created first.
    pub fn open(
        path: impl AsRef<Path>,
        access: FileAccess,
        share: FileShare,
        mode: FileMode,
        attributes: FileAttributes,
        options: FileOptions,
    ) -> Result<Self> {
        let path = path.as_ref();

        if mode != FileMode::Open {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(Error::StdIo)?;
                }
            }
        }

        let mut flags = match access {
            FileAccess::Read => libc::O_RDONLY,
            FileAccess::Write => libc::O_WRONLY,
            FileAccess::ReadWrite => libc::O_RDWR,
        };
        flags |= match mode {
            FileMode::CreateNew => libc::O_CREAT | libc::O_EXCL,
            FileMode::Create => libc::O_CREAT | libc::O_TRUNC,
            FileMode::Open => 0,
            FileMode::OpenOrCreate | FileMode::Append => libc::O_CREAT,
            FileMode::Truncate => libc::O_TRUNC,
        };
        if options.contains(FileOptions::WRITE_THROUGH) {
            flags |= libc::O_SYNC;
        }

        let create_mode = if attributes.contains(FileAttributes::READ_ONLY) {
            0o444
        } else {
            0o644
        };

        let fd = pal::file::open(path, flags, create_mode).map_err(Error::StdIo)?;

        if options.contains(FileOptions::DELETE_ON_CLOSE) {
            // Unlink now; the open descriptor keeps the data reachable until
            // the stream closes.
            let _ = std::fs::remove_file(path);
        }

        let position = if mode == FileMode::Append {
            pal::file::size(fd.as_raw_fd()).map_err(Error::StdIo)?
        } else {
            0
        };

        let wake = pal::WakePipe::new().map_err(Error::StdIo)?;
        event!(Level::DEBUG, message = "file opened", path = %path.display());

        Ok(Self {
            shared: Arc::new(FileShared {
                fd: Mutex::new(Some(fd)),
                position: AtomicU64::new(position),
                share,
                pending: PendingOps::new(),
                wake,
                assoc: Mutex::new(None),
            }),
        })
    }

    /// Registers this stream with a reactor so asynchronous completions are
    /// delivered through it. File descriptors take no part in readiness
    /// routing; the association only carries completion delivery.
    pub fn associate(&self, proactor: &Proactor) -> Result<()> {
        let mut slot = self.shared.assoc.lock().expect(crate::ERR_POISONED_LOCK);
        if slot.is_some() {
            return Err(Error::AlreadyAssociated);
        }
        self.shared.require_fd()?;
        *slot = Some(Arc::new(Association::new(Arc::clone(proactor.shared()))));
        Ok(())
    }

    /// Whether the underlying descriptor is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.raw_fd().is_some()
    }

    /// The share mode the stream was opened with (advisory on this
    /// platform).
    #[must_use]
    pub fn share_mode(&self) -> FileShare {
        self.shared.share
    }

    /// The number of operations issued on this stream and not yet delivered.
    #[must_use]
    pub fn pending_operations(&self) -> usize {
        self.shared.pending.current()
    }

    /// Reads one chunk at the current position, advancing it by the
    /// transferred count. Returns the buffer and the count; zero means the
    /// position is at or past the end of the file.
    pub fn read(&self, buffer: BytesMut) -> Result<(BytesMut, usize)> {
        self.read_inner(buffer, None)
    }

    /// Reads one chunk at an explicit offset; the current position does not
    /// move.
    pub fn read_at(&self, buffer: BytesMut, offset: u64) -> Result<(BytesMut, usize)> {
        self.read_inner(buffer, Some(offset))
    }

    /// Writes one chunk at the current position, advancing it by the
    /// transferred count.
    pub fn write(&self, buffer: BytesMut) -> Result<(BytesMut, usize)> {
        self.write_inner(buffer, None)
    }

    /// Writes one chunk at an explicit offset; the current position does not
    /// move.
    pub fn write_at(&self, buffer: BytesMut, offset: u64) -> Result<(BytesMut, usize)> {
        self.write_inner(buffer, Some(offset))
    }

    /// Starts a read described by the context (explicit offset, or current
    /// position when the context carries none).
    pub fn read_async(&self, context: FileContext) -> IssueResult<FileContext> {
        self.shared.start(context, FileOp::Read, Route::Reactor)
    }

    /// Starts a write described by the context.
    pub fn write_async(&self, context: FileContext) -> IssueResult<FileContext> {
        self.shared.start(context, FileOp::Write, Route::Reactor)
    }

    /// Takes a byte-range lock in the default mode (exclusive,
    /// fail-immediately). A contended range fails with
    /// [`Error::LockViolation`].
    pub fn lock_file(&self, range: LockRange) -> Result<()> {
        self.lock_file_with(range, LockMode::default(), None)
    }

    /// Takes a byte-range lock with an explicit mode. Without
    /// [`LockMode::FAIL_IMMEDIATELY`], a contended range is retried until it
    /// is granted or `timeout` elapses.
    pub fn lock_file_with(
        &self,
        range: LockRange,
        mode: LockMode,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let mut context = FileContext::new();
            context.set_lock_range(range);
            context.set_lock_mode(mode | LockMode::FAIL_IMMEDIATELY);

            let mut outcome = self.shared.run_sync(context, FileOp::Lock)?;
            match bridge::fold_outcome(&mut outcome, FileContext::take_error) {
                Err(Error::LockViolation) if !mode.contains(LockMode::FAIL_IMMEDIATELY) => {
                    if let Some(deadline) = deadline {
                        if Instant::now() >= deadline {
                            return Err(Error::TimedOut);
                        }
                    }
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                }
                other => return other,
            }
        }
    }

    /// Releases a byte-range lock previously taken through this stream.
    pub fn unlock_file(&self, range: LockRange) -> Result<()> {
        let mut context = FileContext::new();
        context.set_lock_range(range);

        let mut outcome = self.shared.run_sync(context, FileOp::Unlock)?;
        bridge::fold_outcome(&mut outcome, FileContext::take_error)
    }

    /// Starts taking the byte-range lock described by the context. The
    /// asynchronous form always fails immediately on contention, whatever
    /// the context's mode says about waiting.
    pub fn lock_file_async(&self, context: FileContext) -> IssueResult<FileContext> {
        self.shared.start(context, FileOp::Lock, Route::Reactor)
    }

    /// Starts releasing the byte-range lock described by the context.
    pub fn unlock_file_async(&self, context: FileContext) -> IssueResult<FileContext> {
        self.shared.start(context, FileOp::Unlock, Route::Reactor)
    }

    /// Moves the current position and returns the new absolute position.
    /// Negative absolute positions are rejected.
    pub fn seek(&self, origin: SeekOrigin, delta: i64) -> Result<u64> {
        let base = match origin {
            SeekOrigin::Begin => 0,
            SeekOrigin::Current => self.tell(),
            SeekOrigin::End => self.file_size()?,
        };

        let target = i128::from(base) + i128::from(delta);
        let target = u64::try_from(target).map_err(|_| {
            Error::ContractViolation("seek target is before the start of the file".to_string())
        })?;

        self.shared.position.store(target, Ordering::Release);
        Ok(target)
    }

    /// The current position.
    #[must_use]
    pub fn tell(&self) -> u64 {
        self.shared.position.load(Ordering::Acquire)
    }

    /// The current length of the file.
    pub fn file_size(&self) -> Result<u64> {
        let fd = self.shared.require_fd()?;
        pal::file::size(fd).map_err(Error::StdIo)
    }

    /// Sets the length of the file, extending with zeroes or cutting data
    /// off at the new end.
    pub fn set_file_size(&self, size: u64) -> Result<()> {
        let fd = self.shared.require_fd()?;
        pal::file::set_size(fd, size).map_err(Error::StdIo)
    }

    /// Cuts the file off at the current position.
    pub fn truncate(&self) -> Result<()> {
        self.set_file_size(self.tell())
    }

    /// Forces buffered writes to the device.
    pub fn flush(&self) -> Result<()> {
        let fd = self.shared.require_fd()?;
        pal::file::flush(fd).map_err(Error::StdIo)
    }

    /// The last-access timestamp.
    pub fn accessed_time(&self) -> Result<SystemTime> {
        let fd = self.shared.require_fd()?;
        Ok(pal::file::times(fd).map_err(Error::StdIo)?.0)
    }

    /// The last-write timestamp.
    pub fn modified_time(&self) -> Result<SystemTime> {
        let fd = self.shared.require_fd()?;
        Ok(pal::file::times(fd).map_err(Error::StdIo)?.1)
    }

    /// Overwrites the last-access timestamp.
    pub fn set_accessed_time(&self, time: SystemTime) -> Result<()> {
        let fd = self.shared.require_fd()?;
        pal::file::set_times(fd, Some(time), None).map_err(Error::StdIo)
    }

    /// Overwrites the last-write timestamp.
    pub fn set_modified_time(&self, time: SystemTime) -> Result<()> {
        let fd = self.shared.require_fd()?;
        pal::file::set_times(fd, None, Some(time)).map_err(Error::StdIo)
    }

    /// The creation timestamp. This platform does not surface one through
    /// the descriptor; the call reports an unsupported-operation error.
    pub fn creation_time(&self) -> Result<SystemTime> {
        self.shared.require_fd()?;
        Err(Error::unsupported("file creation timestamps"))
    }

    /// Overwrites the creation timestamp. This platform does not record one;
    /// the call reports an unsupported-operation error.
    pub fn set_creation_time(&self, _time: SystemTime) -> Result<()> {
        self.shared.require_fd()?;
        Err(Error::unsupported("file creation timestamps"))
    }

    /// Present for contract uniformity with the other transports; file
    /// operations finish at issue, so there is never anything in flight to
    /// cancel.
    pub fn cancel(&self) {
        self.shared.wake.signal();
    }

    /// Waits until every pending completion has been delivered, then
    /// releases the descriptor. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }

    fn read_inner(&self, buffer: BytesMut, offset: Option<u64>) -> Result<(BytesMut, usize)> {
        let mut context = FileContext::with_buffer(buffer);
        if let Some(offset) = offset {
            context.set_offset(offset);
        }

        let mut outcome = self.shared.run_sync(context, FileOp::Read)?;
        bridge::fold_outcome(&mut outcome, FileContext::take_error)?;
        let transferred = outcome.context.transferred();
        Ok((outcome.context.take_buffer(), transferred))
    }

    fn write_inner(&self, buffer: BytesMut, offset: Option<u64>) -> Result<(BytesMut, usize)> {
        let mut context = FileContext::with_buffer(buffer);
        if let Some(offset) = offset {
            context.set_offset(offset);
        }

        let mut outcome = self.shared.run_sync(context, FileOp::Write)?;
        bridge::fold_outcome(&mut outcome, FileContext::take_error)?;
        let transferred = outcome.context.transferred();
        Ok((outcome.context.take_buffer(), transferred))
    }
}

impl Drop for FileStream {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let _ = self.shared.fd.lock().map(|mut fd| fd.take());
            return;
        }
        self.shared.close();
    }
}

impl FileShared {
    fn raw_fd(&self) -> Option<RawFd> {
        self.fd
            .lock()
            .expect(crate::ERR_POISONED_LOCK)
            .as_ref()
            .map(AsRawFd::as_raw_fd)
    }

    fn require_fd(&self) -> Result<RawFd> {
        self.raw_fd().ok_or(Error::ClosedHandle)
    }

    fn assoc(&self) -> Option<Arc<Association>> {
        self.assoc.lock().expect(crate::ERR_POISONED_LOCK).clone()
    }

    fn validate(&self, op: FileOp, context: &FileContext) -> Result<()> {
        match op {
            FileOp::Read => {
                if context.buffer().capacity() == context.buffer().len() {
                    return Err(Error::ContractViolation(
                        "read requires spare buffer capacity".to_string(),
                    ));
                }
            }
            FileOp::Write => {
                if context.buffer().is_empty() {
                    return Err(Error::ContractViolation(
                        "write requires a non-empty buffer".to_string(),
                    ));
                }
            }
            FileOp::Lock | FileOp::Unlock => {
                if context.lock_range().is_none() {
                    return Err(Error::ContractViolation(
                        "lock operations require a byte range".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn start(
        &self,
        mut context: FileContext,
        op: FileOp,
        route: Route<FileContext>,
    ) -> IssueResult<FileContext> {
        let Some(fd) = self.raw_fd() else {
            return Err(Rejected::new(Error::ClosedHandle, context));
        };

        let assoc = self.assoc();
        if matches!(route, Route::Reactor) && assoc.is_none() {
            return Err(Rejected::new(Error::NotAssociated, context));
        }

        if let Err(error) = self.validate(op, &context) {
            return Err(Rejected::new(error, context));
        }

        context.stamp(op);
        let guard = self.pending.begin();
        event!(Level::TRACE, message = "file operation issued", ?op, fd);

        // File operations have no would-block path on this platform: the
        // positioned syscall runs here and the completion is queued at once.
        let (error, transferred) = self.perform(fd, &mut context);
        context.finalize(error, transferred);
        deliver_one(
            assoc.as_ref().map(|a| a.proactor()),
            crate::pending::Finished {
                context,
                route,
                guard,
            },
        );
        Ok(())
    }

    fn perform(&self, fd: RawFd, context: &mut FileContext) -> (Option<Error>, usize) {
        match context.last_op() {
            Some(FileOp::Read) => {
                let offset = context
                    .offset()
                    .unwrap_or_else(|| self.position.load(Ordering::Acquire));
                let wanted = context.buffer().capacity() - context.buffer().len();

                match self.denied_by_lock(fd, offset, wanted as u64, false) {
                    Ok(false) => {}
                    Ok(true) => return (Some(Error::LockViolation), 0),
                    Err(error) => return io_failure(error),
                }

                match pal::file::read_at(fd, context.buffer_mut(), offset) {
                    Ok(n) => {
                        if context.offset().is_none() {
                            self.position.store(offset + n as u64, Ordering::Release);
                        }
                        (None, n)
                    }
                    Err(error) => io_failure(error),
                }
            }
            Some(FileOp::Write) => {
                let offset = context
                    .offset()
                    .unwrap_or_else(|| self.position.load(Ordering::Acquire));
                let wanted = context.buffer().len() as u64;

                match self.denied_by_lock(fd, offset, wanted, true) {
                    Ok(false) => {}
                    Ok(true) => return (Some(Error::LockViolation), 0),
                    Err(error) => return io_failure(error),
                }

                match pal::file::write_at(fd, context.buffer(), offset) {
                    Ok(n) => {
                        if context.offset().is_none() {
                            self.position.store(offset + n as u64, Ordering::Release);
                        }
                        (None, n)
                    }
                    Err(error) => io_failure(error),
                }
            }
            Some(FileOp::Lock) => {
                let Some(range) = context.lock_range() else {
                    return (
                        Some(Error::ContractViolation("lock lost its range".to_string())),
                        0,
                    );
                };
                let exclusive = context.lock_mode().contains(LockMode::EXCLUSIVE);

                match pal::file::lock(fd, range.offset, range.length, exclusive, false) {
                    Ok(()) => (None, 0),
                    Err(error)
                        if error.raw_os_error() == Some(libc::EAGAIN)
                            || error.raw_os_error() == Some(libc::EACCES) =>
                    {
                        (Some(Error::LockViolation), 0)
                    }
                    Err(error) => io_failure(error),
                }
            }
            Some(FileOp::Unlock) => {
                let Some(range) = context.lock_range() else {
                    return (
                        Some(Error::ContractViolation(
                            "unlock lost its range".to_string(),
                        )),
                        0,
                    );
                };
                match pal::file::unlock(fd, range.offset, range.length) {
                    Ok(()) => (None, 0),
                    Err(error) => io_failure(error),
                }
            }
            None => (
                Some(Error::ContractViolation(
                    "operation context was never stamped".to_string(),
                )),
                0,
            ),
        }
    }

    /// Byte-range locks deny conflicting reads and writes from other
    /// handles, not just other lock attempts; probe before performing I/O.
    fn denied_by_lock(
        &self,
        fd: RawFd,
        offset: u64,
        length: u64,
        writing: bool,
    ) -> std::io::Result<bool> {
        if length == 0 {
            return Ok(false);
        }
        pal::file::lock_conflicts(fd, offset, length, writing)
    }

    fn run_sync(&self, context: FileContext, op: FileOp) -> Result<SyncOutcome<FileContext>> {
        let (tx, rx) = sync_channel(1);
        self.start(context, op, Route::Private(tx))
            .map_err(Error::from)?;

        // The operation completed at issue; this wait only collects it.
        bridge::block_on(&rx, None, None, &self.wake, || {}, || {})
    }

    fn close(&self) {
        self.pending.wait_drained();
        if let Some(assoc) = self.assoc() {
            assoc.untrack_all();
        }

        let released = self.fd.lock().expect(crate::ERR_POISONED_LOCK).take();
        if released.is_some() {
            event!(Level::DEBUG, message = "file closed");
        }
    }
}

fn io_failure(error: std::io::Error) -> (Option<Error>, usize) {
    (Some(Error::StdIo(error)), 0)
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    fn open_scratch(dir: &tempfile::TempDir, name: &str) -> FileStream {
        FileStream::open(
            dir.path().join(name),
            FileAccess::ReadWrite,
            FileShare::READ,
            FileMode::OpenOrCreate,
            FileAttributes::default(),
            FileOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn thread_safe_type() {
        assert_impl_all!(FileStream: Send, Sync);
    }

    #[test]
    fn open_creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c/data.bin");

        let stream = FileStream::open(
            &nested,
            FileAccess::ReadWrite,
            FileShare::empty(),
            FileMode::CreateNew,
            FileAttributes::default(),
            FileOptions::default(),
        )
        .unwrap();
        assert!(nested.exists());
        drop(stream);
    }

    #[test]
    fn current_position_tracking_advances_by_transferred() {
        let dir = tempfile::tempdir().unwrap();
        let stream = open_scratch(&dir, "pos.bin");

        let (_, written) = stream.write(BytesMut::from(&b"0123456789"[..])).unwrap();
        assert_eq!(written, 10);
        assert_eq!(stream.tell(), 10);

        let position = stream.seek(SeekOrigin::Begin, 4).unwrap();
        assert_eq!(position, 4);

        let (buffer, read) = stream.read(BytesMut::with_capacity(3)).unwrap();
        assert_eq!(read, 3);
        assert_eq!(&buffer[..], b"456");
        assert_eq!(stream.tell(), 7);
    }

    #[test]
    fn seek_rejects_negative_absolute_positions() {
        let dir = tempfile::tempdir().unwrap();
        let stream = open_scratch(&dir, "seek.bin");

        assert!(stream.seek(SeekOrigin::Begin, -1).is_err());
        assert!(stream.seek(SeekOrigin::Current, -1).is_err());
    }

    #[test]
    fn read_at_or_past_end_reports_zero_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let stream = open_scratch(&dir, "eof.bin");
        let _ = stream.write(BytesMut::from(&b"abc"[..])).unwrap();

        let (_, read) = stream.read_at(BytesMut::with_capacity(16), 3).unwrap();
        assert_eq!(read, 0);

        let (_, read) = stream.read_at(BytesMut::with_capacity(16), 1000).unwrap();
        assert_eq!(read, 0);
    }

    #[test]
    fn append_mode_starts_at_the_end() {
        let dir = tempfile::tempdir().unwrap();
        {
            let stream = open_scratch(&dir, "append.bin");
            let _ = stream.write(BytesMut::from(&b"head"[..])).unwrap();
        }

        let stream = FileStream::open(
            dir.path().join("append.bin"),
            FileAccess::ReadWrite,
            FileShare::empty(),
            FileMode::Append,
            FileAttributes::default(),
            FileOptions::default(),
        )
        .unwrap();
        assert_eq!(stream.tell(), 4);
    }

    #[test]
    fn truncate_cuts_at_current_position() {
        let dir = tempfile::tempdir().unwrap();
        let stream = open_scratch(&dir, "trunc.bin");
        let _ = stream.write(BytesMut::from(&b"0123456789"[..])).unwrap();

        let _ = stream.seek(SeekOrigin::Begin, 4).unwrap();
        stream.truncate().unwrap();
        assert_eq!(stream.file_size().unwrap(), 4);
    }

    #[test]
    fn creation_time_is_unsupported_here() {
        let dir = tempfile::tempdir().unwrap();
        let stream = open_scratch(&dir, "ctime.bin");

        assert!(stream.creation_time().is_err());
        assert!(stream.set_creation_time(SystemTime::now()).is_err());
    }

    #[test]
    fn delete_on_close_removes_the_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ephemeral.bin");
        let stream = FileStream::open(
            &path,
            FileAccess::ReadWrite,
            FileShare::empty(),
            FileMode::CreateNew,
            FileAttributes::default(),
            FileOptions::DELETE_ON_CLOSE,
        )
        .unwrap();

        assert!(!path.exists());
        drop(stream);
        assert!(!path.exists());
    }
}
