// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::{HashMap, VecDeque};
use std::os::fd::{BorrowedFd, RawFd};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use polling::{Event, Events, Poller};
use tracing::{Level, event};

use crate::pal::Interest;
use crate::pending::{Finished, OpContext, Route};
use crate::portal::Portal;
use crate::{ERR_POISONED_LOCK, Error};

/// How long a thread that lost the poller election naps on the completion
/// queue before re-contending for the poller role.
const GATE_RETRY: Duration = Duration::from_millis(50);

/// The reactor: one dispatcher multiplexing completion notifications for
/// every transport associated with it.
///
/// Transports register through their `associate()` methods; any number of
/// worker threads then call [`run()`][1] concurrently, and each queued
/// completion is delivered to exactly one of them. Completions for a single
/// context are delivered exactly once; no ordering holds between different
/// contexts, even on the same handle — callers needing in-order delivery
/// keep one operation in flight per logical stream.
///
/// Synchronous wrappers never touch the reactor: their completions route to a
/// private waitable instead of the shared queue, so a reactor is only needed
/// for delegate-driven asynchronous work.
///
/// Cloning produces another handle to the same reactor. Dropping the last
/// handle releases the dispatcher; the caller is responsible for having
/// drained pending operations on associated transports first — the reactor
/// does not track or wait for them.
///
/// # Thread safety
///
/// This type is thread-safe.
///
/// [1]: Self::run
#[derive(Debug, Clone)]
pub struct Proactor {
    shared: Arc<ProactorShared>,
}

impl Proactor {
    /// Creates the reactor and its kernel wait facility. Fails on resource
    /// exhaustion; the failure is not retryable by the reactor itself.
    pub fn new() -> crate::Result<Self> {
        Ok(Self {
            shared: Arc::new(ProactorShared::new()?),
        })
    }

    /// Blocks until one completion is delivered or the timeout elapses
    /// (`None` waits indefinitely). Returns whether a completion was
    /// delivered; on timeout, yields the thread briefly and returns `false`
    /// without side effects.
    ///
    /// Re-entrant: any number of threads may call this concurrently against
    /// the same reactor, each call consuming at most one completion. One
    /// caller at a time waits on the kernel; the rest wait for queued
    /// completions.
    pub fn run(&self, timeout: Option<Duration>) -> bool {
        self.shared.run(timeout)
    }

    pub(crate) fn shared(&self) -> &Arc<ProactorShared> {
        &self.shared
    }
}

/// A unit of delivery: invokes the completion delegate of one finished
/// operation and releases its pending-operation accounting.
pub(crate) struct Completion(Box<dyn FnOnce() + Send>);

impl Completion {
    pub(crate) fn new(deliver: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(deliver))
    }

    fn invoke(self) {
        (self.0)();
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Completion")
    }
}

#[derive(Debug)]
pub(crate) struct ProactorShared {
    poller: Poller,
    registry: Mutex<HashMap<usize, Weak<dyn Portal>>>,
    completed: Mutex<VecDeque<Completion>>,
    completed_cv: Condvar,
    // Elects the single thread allowed to wait on the kernel; the losers
    // park on the completion queue instead.
    poll_gate: Mutex<()>,
    next_key: AtomicUsize,
}

impl ProactorShared {
    fn new() -> crate::Result<Self> {
        Ok(Self {
            poller: Poller::new().map_err(Error::StdIo)?,
            registry: Mutex::new(HashMap::new()),
            completed: Mutex::new(VecDeque::new()),
            completed_cv: Condvar::new(),
            poll_gate: Mutex::new(()),
            next_key: AtomicUsize::new(1),
        })
    }

    /// Registers a portal and returns the routing key completions for its
    /// descriptor will carry.
    pub(crate) fn register_portal(&self, portal: Weak<dyn Portal>) -> usize {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.registry
            .lock()
            .expect(ERR_POISONED_LOCK)
            .insert(key, portal);
        key
    }

    pub(crate) fn unregister_portal(&self, key: usize) {
        self.registry.lock().expect(ERR_POISONED_LOCK).remove(&key);
    }

    /// Adds a descriptor to the kernel wait facility with no interest armed.
    /// Interest is armed per parked operation through [`rearm()`][Self::rearm].
    pub(crate) fn add_fd(&self, fd: RawFd, key: usize) -> crate::Result<()> {
        // SAFETY: The transport owns the descriptor and removes it from the
        // poller before closing it (teardown drains first, then deletes).
        unsafe { self.poller.add(fd, Event::none(key)) }.map_err(Error::StdIo)
    }

    /// Re-arms (or disarms) the one-shot readiness interest of a registered
    /// descriptor.
    pub(crate) fn rearm(&self, fd: RawFd, key: usize, interest: Interest) {
        // SAFETY: The descriptor is alive for as long as its registration
        // exists; see add_fd.
        let source = unsafe { BorrowedFd::borrow_raw(fd) };
        if let Err(error) = self.poller.modify(&source, event_for(key, interest)) {
            event!(
                Level::DEBUG,
                message = "failed to re-arm poller interest",
                fd,
                key,
                %error
            );
        }
    }

    /// Removes a descriptor from the kernel wait facility. Harmless if it was
    /// never added or is already gone.
    pub(crate) fn delete_fd(&self, fd: RawFd) {
        // SAFETY: Borrowing for the duration of the call only.
        let source = unsafe { BorrowedFd::borrow_raw(fd) };
        let _ = self.poller.delete(&source);
    }

    /// Queues one completion for delivery by a `run()` caller.
    pub(crate) fn enqueue(&self, completion: Completion) {
        self.completed
            .lock()
            .expect(ERR_POISONED_LOCK)
            .push_back(completion);
        self.completed_cv.notify_all();
        let _ = self.poller.notify();
    }

    /// Wakes the thread currently waiting on the kernel, if any.
    pub(crate) fn notify(&self) {
        self.completed_cv.notify_all();
        let _ = self.poller.notify();
    }

    fn pop(&self) -> Option<Completion> {
        self.completed.lock().expect(ERR_POISONED_LOCK).pop_front()
    }

    fn run(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if let Some(completion) = self.pop() {
                // Give a parked thread the chance to take over the poller
                // role we may have been about to claim.
                self.completed_cv.notify_all();
                completion.invoke();
                return true;
            }

            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        thread::yield_now();
                        return false;
                    }
                    Some(deadline - now)
                }
                None => None,
            };

            if let Ok(gate) = self.poll_gate.try_lock() {
                let mut events = Events::new();
                if let Err(error) = self.poller.wait(&mut events, remaining) {
                    if error.kind() != std::io::ErrorKind::Interrupted {
                        event!(Level::DEBUG, message = "kernel wait failed", %error);
                        thread::yield_now();
                        return false;
                    }
                }

                let mut stale = Vec::new();
                for ev in events.iter() {
                    let portal = self
                        .registry
                        .lock()
                        .expect(ERR_POISONED_LOCK)
                        .get(&ev.key)
                        .cloned();
                    match portal.and_then(|weak| weak.upgrade()) {
                        Some(portal) => portal.on_ready(),
                        None => stale.push(ev.key),
                    }
                }

                // A dead weak reference means the portal was torn down while
                // its registration lingered; unregister it on sight.
                if !stale.is_empty() {
                    let mut registry = self.registry.lock().expect(ERR_POISONED_LOCK);
                    for key in stale {
                        registry.remove(&key);
                    }
                }

                drop(gate);
                self.completed_cv.notify_all();
            } else {
                let queue = self.completed.lock().expect(ERR_POISONED_LOCK);
                if queue.is_empty() {
                    let nap = remaining.map_or(GATE_RETRY, |r| r.min(GATE_RETRY));
                    let _ = self
                        .completed_cv
                        .wait_timeout(queue, nap)
                        .expect(ERR_POISONED_LOCK);
                }
            }
        }
    }
}

fn event_for(key: usize, interest: Interest) -> Event {
    match (interest.readable, interest.writable) {
        (true, true) => Event::all(key),
        (true, false) => Event::readable(key),
        (false, true) => Event::writable(key),
        (false, false) => Event::none(key),
    }
}

/// The transport side of an association: the reactor plus the routing keys of
/// every descriptor the transport has registered with it.
///
/// A handle may be associated with at most one reactor at a time; transports
/// enforce this by holding at most one of these.
#[derive(Debug)]
pub(crate) struct Association {
    proactor: Arc<ProactorShared>,
    keys: Mutex<HashMap<RawFd, usize>>,
}

impl Association {
    pub(crate) fn new(proactor: Arc<ProactorShared>) -> Self {
        Self {
            proactor,
            keys: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn proactor(&self) -> &Arc<ProactorShared> {
        &self.proactor
    }

    /// Registers a descriptor for readiness routing to the given portal.
    pub(crate) fn track(&self, fd: RawFd, portal: Weak<dyn Portal>) -> crate::Result<()> {
        let key = self.proactor.register_portal(portal);
        if let Err(error) = self.proactor.add_fd(fd, key) {
            self.proactor.unregister_portal(key);
            return Err(error);
        }
        self.keys.lock().expect(ERR_POISONED_LOCK).insert(fd, key);
        event!(Level::DEBUG, message = "descriptor associated", fd, key);
        Ok(())
    }

    /// Refreshes the one-shot readiness interest of a tracked descriptor to
    /// the union its parked operations currently need.
    pub(crate) fn rearm(&self, fd: RawFd, interest: Interest) {
        if let Some(key) = self.keys.lock().expect(ERR_POISONED_LOCK).get(&fd).copied() {
            self.proactor.rearm(fd, key, interest);
        }
    }

    /// Removes one descriptor's registration, e.g. when a pipe session ends
    /// while its listener lives on.
    pub(crate) fn untrack(&self, fd: RawFd) {
        if let Some(key) = self.keys.lock().expect(ERR_POISONED_LOCK).remove(&fd) {
            self.proactor.delete_fd(fd);
            self.proactor.unregister_portal(key);
        }
    }

    /// Removes every registration this association created.
    pub(crate) fn untrack_all(&self) {
        let keys = std::mem::take(&mut *self.keys.lock().expect(ERR_POISONED_LOCK));
        for (fd, key) in keys {
            self.proactor.delete_fd(fd);
            self.proactor.unregister_portal(key);
        }
    }
}

/// Hands one finished operation to its destination: the reactor queue for
/// delegate delivery inside `run()`, or the private channel of a synchronous
/// wait. Pending-operation accounting is released only after the handoff.
pub(crate) fn deliver_one<C: OpContext>(
    proactor: Option<&Arc<ProactorShared>>,
    finished: Finished<C>,
) {
    match finished.route {
        Route::Private(tx) => {
            // The waiter may have given up (e.g. after its final fetch); the
            // completion is then dropped here, which is fine - the buffer
            // dies with the context and the accounting still balances.
            let _ = tx.send(finished.context);
            drop(finished.guard);
        }
        Route::Reactor => {
            let Some(proactor) = proactor else {
                // Unreachable through the public API: reactor routing is
                // refused at issue when the transport is not associated.
                drop(finished.guard);
                return;
            };

            let mut context = finished.context;
            let guard = finished.guard;
            proactor.enqueue(Completion::new(move || {
                if let Some(mut handler) = context.take_handler() {
                    handler.on_event(context);
                }
                drop(guard);
            }));
        }
    }
}

pub(crate) fn deliver_all<C: OpContext>(
    proactor: Option<&Arc<ProactorShared>>,
    finished: Vec<Finished<C>>,
) {
    for op in finished {
        deliver_one(proactor, op);
    }
}
