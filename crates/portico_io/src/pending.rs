// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, Condvar, Mutex};

use crate::pal::Interest;
use crate::{BoxedCompletionHandler, ERR_POISONED_LOCK, Error};

/// Pending-operation accounting for one transport object.
///
/// The count is incremented on the issuing thread when an operation leaves
/// the *idle* state and decremented (through [`PendingOpGuard`]) on whichever
/// thread delivers its completion. Teardown must not release the underlying
/// descriptor while the count is nonzero; [`wait_drained()`][1] blocks on an
/// explicit signal until it reaches zero.
///
/// [1]: Self::wait_drained
#[derive(Debug, Default)]
pub(crate) struct PendingOps {
    count: AtomicUsize,
    // The mutex guards nothing but the condvar protocol: a decrement to zero
    // takes it before notifying, so a waiter cannot miss the signal between
    // its load and its wait.
    drain: Mutex<()>,
    drained: Condvar,
}

impl PendingOps {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Accounts for one newly issued operation.
    pub(crate) fn begin(self: &Arc<Self>) -> PendingOpGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        PendingOpGuard {
            owner: Arc::clone(self),
        }
    }

    /// The number of operations issued but not yet delivered.
    pub(crate) fn current(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Blocks until every issued operation has been delivered.
    pub(crate) fn wait_drained(&self) {
        let mut guard = self.drain.lock().expect(ERR_POISONED_LOCK);
        while self.count.load(Ordering::Acquire) != 0 {
            guard = self.drained.wait(guard).expect(ERR_POISONED_LOCK);
        }
    }
}

/// Decrements the pending-operation count of its owner when dropped, after
/// the completion it accounts for has been delivered.
#[derive(Debug)]
pub(crate) struct PendingOpGuard {
    owner: Arc<PendingOps>,
}

impl Drop for PendingOpGuard {
    fn drop(&mut self) {
        let remaining = self.owner.count.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 {
            let _guard = self.owner.drain.lock().expect(ERR_POISONED_LOCK);
            self.owner.drained.notify_all();
        }
    }
}

/// Completion state every operation context carries: the engine stamps the
/// outcome exactly once and hands the handler back out for invocation.
pub(crate) trait OpContext: Send + Sized + 'static {
    /// Stamps the completion outcome. Called exactly once per issued
    /// operation, on the thread that finished it.
    fn finalize(&mut self, error: Option<Error>, transferred: usize);

    /// Removes the completion delegate so the deliverer can invoke it with
    /// the context moved out of the engine.
    fn take_handler(&mut self) -> Option<BoxedCompletionHandler<Self>>;
}

/// Where a completion goes once the operation has finished.
///
/// Reactor-routed operations complete through the owning reactor's queue and
/// their delegate runs inside [`Proactor::run()`][1]. Privately routed
/// operations — the synchronous wrappers — complete into a bounded channel
/// that plays the role of the private waitable, bypassing the shared reactor
/// entirely.
///
/// [1]: crate::Proactor::run
#[derive(Debug)]
pub(crate) enum Route<C> {
    Reactor,
    Private(SyncSender<C>),
}

/// One operation that would have blocked: its context, its delivery route and
/// the readiness that will let it finish.
#[derive(Debug)]
pub(crate) struct Parked<C> {
    pub(crate) context: C,
    pub(crate) route: Route<C>,
    pub(crate) guard: PendingOpGuard,
    pub(crate) fd: RawFd,
    pub(crate) interest: Interest,
}

/// An operation whose finishing syscall has run; the outcome is already
/// stamped into the context and only delivery remains.
#[derive(Debug)]
pub(crate) struct Finished<C> {
    pub(crate) context: C,
    pub(crate) route: Route<C>,
    pub(crate) guard: PendingOpGuard,
}

/// Outcome of one finish attempt against a parked operation.
pub(crate) enum Attempt {
    /// The operation is done; stamp the outcome and deliver.
    Finished {
        error: Option<Error>,
        transferred: usize,
    },
    /// Still waiting; keep it parked with this readiness interest.
    Pending(Interest),
}

/// Which parked operations a drive pass may touch. Readiness dispatched by a
/// reactor finishes reactor-routed operations; a synchronous waiter drives
/// only its own private ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DriveScope {
    Reactor,
    Private,
}

impl<C> Route<C> {
    const fn scope(&self) -> DriveScope {
        match self {
            Self::Reactor => DriveScope::Reactor,
            Self::Private(_) => DriveScope::Private,
        }
    }
}

/// The set of parked operations of one transport object.
#[derive(Debug)]
pub(crate) struct OpTable<C> {
    parked: Mutex<Vec<Parked<C>>>,
}

impl<C: OpContext> OpTable<C> {
    pub(crate) fn new() -> Self {
        Self {
            parked: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn park(&self, op: Parked<C>) {
        self.parked.lock().expect(ERR_POISONED_LOCK).push(op);
    }

    /// Runs one finish attempt over every parked operation in scope. Finished
    /// operations are stamped and returned for delivery; the rest stay parked
    /// with their interest refreshed.
    pub(crate) fn drive(
        &self,
        scope: DriveScope,
        mut attempt: impl FnMut(&mut C) -> Attempt,
    ) -> Vec<Finished<C>> {
        let mut parked = self.parked.lock().expect(ERR_POISONED_LOCK);
        let mut finished = Vec::new();

        let mut index = 0;
        while index < parked.len() {
            if parked[index].route.scope() != scope {
                index += 1;
                continue;
            }

            match attempt(&mut parked[index].context) {
                Attempt::Finished { error, transferred } => {
                    let mut op = parked.swap_remove(index);
                    op.context.finalize(error, transferred);
                    finished.push(Finished {
                        context: op.context,
                        route: op.route,
                        guard: op.guard,
                    });
                }
                Attempt::Pending(interest) => {
                    parked[index].interest = interest;
                    index += 1;
                }
            }
        }

        finished
    }

    /// Removes every parked operation, stamping each as canceled. The caller
    /// delivers them; a canceled operation still completes and still counts
    /// against the pending total until delivered.
    pub(crate) fn cancel_all(&self) -> Vec<Finished<C>> {
        let parked = std::mem::take(&mut *self.parked.lock().expect(ERR_POISONED_LOCK));

        parked
            .into_iter()
            .map(|mut op| {
                op.context.finalize(Some(Error::Canceled), 0);
                Finished {
                    context: op.context,
                    route: op.route,
                    guard: op.guard,
                }
            })
            .collect()
    }

    /// The union of readiness interest of reactor-routed operations parked on
    /// the given descriptor; drives the poller re-arm after a dispatch.
    pub(crate) fn reactor_interest(&self, fd: RawFd) -> Interest {
        self.parked
            .lock()
            .expect(ERR_POISONED_LOCK)
            .iter()
            .filter(|op| op.fd == fd && matches!(op.route, Route::Reactor))
            .fold(Interest::default(), |acc, op| acc.union(op.interest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_drop_signals_drain() {
        let pending = PendingOps::new();
        let first = pending.begin();
        let second = pending.begin();
        assert_eq!(pending.current(), 2);

        drop(first);
        assert_eq!(pending.current(), 1);

        let waiter = std::thread::spawn({
            let pending = Arc::clone(&pending);
            move || pending.wait_drained()
        });

        drop(second);
        waiter.join().unwrap();
        assert_eq!(pending.current(), 0);
    }

    #[test]
    fn wait_drained_returns_immediately_when_idle() {
        let pending = PendingOps::new();
        pending.wait_drained();
    }

    #[derive(Debug)]
    struct TestContext {
        error: Option<Error>,
        transferred: usize,
    }

    impl OpContext for TestContext {
        fn finalize(&mut self, error: Option<Error>, transferred: usize) {
            self.error = error;
            self.transferred = transferred;
        }

        fn take_handler(&mut self) -> Option<BoxedCompletionHandler<Self>> {
            None
        }
    }

    fn parked(pending: &Arc<PendingOps>, interest: Interest) -> Parked<TestContext> {
        Parked {
            context: TestContext {
                error: None,
                transferred: 0,
            },
            route: Route::Reactor,
            guard: pending.begin(),
            fd: 7,
            interest,
        }
    }

    #[test]
    fn drive_extracts_only_finished_operations() {
        let pending = PendingOps::new();
        let table = OpTable::new();
        table.park(parked(&pending, Interest::READABLE));
        table.park(parked(&pending, Interest::WRITABLE));

        let mut first = true;
        let finished = table.drive(DriveScope::Reactor, |_context| {
            if std::mem::take(&mut first) {
                Attempt::Finished {
                    error: None,
                    transferred: 10,
                }
            } else {
                Attempt::Pending(Interest::WRITABLE)
            }
        });

        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].context.transferred, 10);
        assert_eq!(table.reactor_interest(7), Interest::WRITABLE);
        assert_eq!(pending.current(), 2);

        drop(finished);
        assert_eq!(pending.current(), 1);
    }

    #[test]
    fn cancel_all_stamps_cancellation() {
        let pending = PendingOps::new();
        let table = OpTable::new();
        table.park(parked(&pending, Interest::READABLE));

        let canceled = table.cancel_all();
        assert_eq!(canceled.len(), 1);
        assert!(matches!(canceled[0].context.error, Some(Error::Canceled)));
        assert!(table.reactor_interest(7).is_none());
    }
}
