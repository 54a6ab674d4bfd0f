// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use bytes::BytesMut;
use tracing::{Level, event};

use crate::bridge::{self, SyncOutcome};
use crate::pal::{self, Interest};
use crate::pending::{Attempt, DriveScope, OpContext, OpTable, Parked, PendingOps, Route};
use crate::portal::Portal;
use crate::proactor::{Association, deliver_all, deliver_one};
use crate::{
    DirContext, DirOp, Error, IssueResult, MAX_CHANGE_BUFFER, MIN_CHANGE_BUFFER, NotifyFilter,
    Proactor, Rejected, Result,
};

/// A directory opened for change notification.
///
/// [`read_changes`][1] arms a watch described by a [`NotifyFilter`] bitmask
/// plus a watch-subtree flag and completes once change records are
/// available, delivering them as raw platform-shaped bytes in the caller's
/// buffer. Record parsing is a collaborator's concern; this layer treats the
/// buffer as opaque.
///
/// The dual synchronous/asynchronous contract, cancellation and teardown all
/// work as on the other transports.
///
/// # Thread safety
///
/// This type is thread-safe.
///
/// [1]: Self::read_changes
#[derive(Debug)]
pub struct Directory {
    shared: Arc<DirShared>,
}

#[derive(Debug)]
struct DirShared {
    path: PathBuf,
    weak: Weak<DirShared>,
    fd: Mutex<Option<OwnedFd>>,
    ops: OpTable<DirContext>,
    pending: Arc<PendingOps>,
    wake: pal::WakePipe,
    assoc: Mutex<Option<Arc<Association>>>,
}

impl Directory {
    /// Opens `path` for change notification. The path must name an existing
    /// directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_dir() {
            return Err(Error::ContractViolation(format!(
                "'{}' is not a directory",
                path.display()
            )));
        }

        let fd = pal::inotify::new().map_err(Error::StdIo)?;
        let wake = pal::WakePipe::new().map_err(Error::StdIo)?;
        event!(Level::DEBUG, message = "directory watch opened", path = %path.display());

        Ok(Self {
            shared: Arc::new_cyclic(|weak| DirShared {
                path,
                weak: weak.clone(),
                fd: Mutex::new(Some(fd)),
                ops: OpTable::new(),
                pending: PendingOps::new(),
                wake,
                assoc: Mutex::new(None),
            }),
        })
    }

    /// Registers this watch with a reactor; required before
    /// [`read_changes_async`][Self::read_changes_async].
    pub fn associate(&self, proactor: &Proactor) -> Result<()> {
        let mut slot = self.shared.assoc.lock().expect(crate::ERR_POISONED_LOCK);
        if slot.is_some() {
            return Err(Error::AlreadyAssociated);
        }
        let fd = self.shared.require_fd()?;

        let assoc = Arc::new(Association::new(Arc::clone(proactor.shared())));
        assoc.track(fd, self.shared.weak.clone())?;
        *slot = Some(assoc);
        Ok(())
    }

    /// Whether the watch descriptor is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.raw_fd().is_some()
    }

    /// The number of operations issued on this watch and not yet delivered.
    #[must_use]
    pub fn pending_operations(&self) -> usize {
        self.shared.pending.current()
    }

    /// Arms the watch with the context's filter and subtree flag and waits
    /// up to `timeout` for change records, delivering them into `buffer`.
    /// Returns the buffer and the number of record bytes.
    pub fn read_changes(
        &self,
        buffer: BytesMut,
        timeout: Option<Duration>,
    ) -> Result<(BytesMut, usize)> {
        self.read_changes_filtered(buffer, NotifyFilter::default(), false, timeout)
    }

    /// [`read_changes`][Self::read_changes] with an explicit filter and
    /// subtree flag.
    pub fn read_changes_filtered(
        &self,
        buffer: BytesMut,
        filter: NotifyFilter,
        watch_subtree: bool,
        timeout: Option<Duration>,
    ) -> Result<(BytesMut, usize)> {
        let mut context = DirContext::with_buffer(buffer);
        context.set_filter(filter);
        context.set_watch_subtree(watch_subtree);

        let mut outcome = self.run_sync(context, timeout)?;
        bridge::fold_outcome(&mut outcome, DirContext::take_error)?;
        let transferred = outcome.context.transferred();
        Ok((outcome.context.take_buffer(), transferred))
    }

    /// Starts a change read described by the context (filter, subtree flag,
    /// record buffer).
    pub fn read_changes_async(&self, context: DirContext) -> IssueResult<DirContext> {
        self.shared.start(context, Route::Reactor)
    }

    /// Cancels every outstanding operation on this watch.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Cancels, drains, and releases the watch descriptor. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }

    fn run_sync(
        &self,
        context: DirContext,
        timeout: Option<Duration>,
    ) -> Result<SyncOutcome<DirContext>> {
        let (tx, rx) = sync_channel(1);
        self.shared
            .start(context, Route::Private(tx))
            .map_err(Error::from)?;

        let fd = self.shared.raw_fd().map(|fd| (fd, Interest::READABLE));
        bridge::block_on(
            &rx,
            timeout,
            fd,
            &self.shared.wake,
            || self.shared.drive(DriveScope::Private),
            || self.shared.cancel(),
        )
    }
}

impl Drop for Directory {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        self.shared.close();
    }
}

impl DirShared {
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

    fn start(&self, mut context: DirContext, route: Route<DirContext>) -> IssueResult<DirContext> {
        let Some(fd) = self.raw_fd() else {
            return Err(Rejected::new(Error::ClosedHandle, context));
        };

        let assoc = self.assoc();
        if matches!(route, Route::Reactor) && assoc.is_none() {
            return Err(Rejected::new(Error::NotAssociated, context));
        }

        let capacity = context.buffer().capacity();
        if !(MIN_CHANGE_BUFFER..=MAX_CHANGE_BUFFER).contains(&capacity) {
            return Err(Rejected::new(
                Error::ContractViolation(format!(
                    "change buffer of {capacity} bytes is outside {MIN_CHANGE_BUFFER}..={MAX_CHANGE_BUFFER}"
                )),
                context,
            ));
        }

        if let Err(error) = self.arm(fd, context.filter(), context.watch_subtree()) {
            return Err(Rejected::new(Error::StdIo(error), context));
        }

        context.stamp(DirOp::ReadChanges);
        let guard = self.pending.begin();
        event!(Level::TRACE, message = "change read issued", fd);

        match self.attempt(&mut context) {
            Attempt::Finished { error, transferred } => {
                context.finalize(error, transferred);
                deliver_one(
                    assoc.as_ref().map(|a| a.proactor()),
                    crate::pending::Finished {
                        context,
                        route,
                        guard,
                    },
                );
            }
            Attempt::Pending(interest) => {
                let is_reactor = matches!(route, Route::Reactor);
                self.ops.park(Parked {
                    context,
                    route,
                    guard,
                    fd,
                    interest,
                });
                if is_reactor {
                    if let Some(assoc) = assoc {
                        assoc.rearm(fd, self.ops.reactor_interest(fd));
                    }
                }
            }
        }
        Ok(())
    }

    /// Registers kernel watches matching the filter: the directory itself
    /// and, with the subtree flag, every directory below it. Watches stay
    /// registered until the next arm or teardown; re-arming the same
    /// directory updates its mask in place.
    fn arm(&self, fd: RawFd, filter: NotifyFilter, subtree: bool) -> std::io::Result<()> {
        let mask = inotify_mask(filter);
        pal::inotify::add_watch(fd, &self.path, mask)?;

        if subtree {
            let mut stack = vec![self.path.clone()];
            while let Some(dir) = stack.pop() {
                // A subdirectory disappearing mid-walk is a change, not a
                // failure; skip what cannot be read.
                let Ok(entries) = std::fs::read_dir(&dir) else {
                    continue;
                };
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.is_dir() {
                        let _ = pal::inotify::add_watch(fd, &path, mask);
                        stack.push(path);
                    }
                }
            }
        }
        Ok(())
    }

    fn attempt(&self, context: &mut DirContext) -> Attempt {
        let Some(fd) = self.raw_fd() else {
            return Attempt::Finished {
                error: Some(Error::ClosedHandle),
                transferred: 0,
            };
        };

        match pal::inotify::read_events(fd, context.buffer_mut()) {
            Ok(n) => Attempt::Finished {
                error: None,
                transferred: n,
            },
            Err(error) if pal::is_would_block(&error) => Attempt::Pending(Interest::READABLE),
            Err(error) => Attempt::Finished {
                error: Some(Error::StdIo(error)),
                transferred: 0,
            },
        }
    }

    fn drive(&self, scope: DriveScope) {
        let assoc = self.assoc();
        let finished = self.ops.drive(scope, |context| self.attempt(context));
        deliver_all(assoc.as_ref().map(|a| a.proactor()), finished);

        if scope == DriveScope::Reactor {
            if let (Some(assoc), Some(fd)) = (assoc, self.raw_fd()) {
                assoc.rearm(fd, self.ops.reactor_interest(fd));
            }
        }
    }

    fn cancel(&self) {
        let finished = self.ops.cancel_all();
        if !finished.is_empty() {
            event!(
                Level::DEBUG,
                message = "change reads canceled",
                count = finished.len()
            );
        }
        let assoc = self.assoc();
        deliver_all(assoc.as_ref().map(|a| a.proactor()), finished);
        self.wake.signal();
    }

    fn close(&self) {
        self.cancel();
        self.pending.wait_drained();

        if let Some(assoc) = self.assoc() {
            assoc.untrack_all();
        }

        let released = self.fd.lock().expect(crate::ERR_POISONED_LOCK).take();
        if released.is_some() {
            event!(Level::DEBUG, message = "directory watch closed", path = %self.path.display());
        }
    }
}

impl Portal for DirShared {
    fn on_ready(&self) {
        self.drive(DriveScope::Reactor);
    }
}

fn inotify_mask(filter: NotifyFilter) -> u32 {
    let mut mask = 0;
    if filter.intersects(NotifyFilter::FILE_NAME | NotifyFilter::DIR_NAME) {
        mask |= libc::IN_CREATE | libc::IN_DELETE | libc::IN_MOVED_FROM | libc::IN_MOVED_TO;
    }
    if filter.intersects(NotifyFilter::ATTRIBUTES | NotifyFilter::SECURITY) {
        mask |= libc::IN_ATTRIB;
    }
    if filter.intersects(NotifyFilter::SIZE | NotifyFilter::LAST_WRITE) {
        mask |= libc::IN_MODIFY | libc::IN_CLOSE_WRITE;
    }
    if filter.contains(NotifyFilter::LAST_ACCESS) {
        mask |= libc::IN_ACCESS;
    }
    if filter.contains(NotifyFilter::CREATION) {
        mask |= libc::IN_CREATE;
    }
    mask
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    #[test]
    fn thread_safe_type() {
        assert_impl_all!(Directory: Send, Sync);
    }

    #[test]
    fn open_rejects_non_directories() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        std::fs::write(&file, b"x").unwrap();

        assert!(Directory::open(&file).is_err());
    }

    #[test]
    fn change_buffer_bounds_are_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let watch = Directory::open(dir.path()).unwrap();

        let too_small = watch.read_changes(
            BytesMut::with_capacity(MIN_CHANGE_BUFFER / 2),
            Some(Duration::from_millis(10)),
        );
        assert!(matches!(too_small, Err(Error::ContractViolation(_))));
    }

    #[test]
    fn filter_maps_to_a_nonempty_mask() {
        assert_ne!(inotify_mask(NotifyFilter::default()), 0);
        assert_ne!(inotify_mask(NotifyFilter::LAST_ACCESS), 0);
        assert_ne!(inotify_mask(NotifyFilter::SECURITY), 0);
    }
}
