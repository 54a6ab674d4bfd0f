// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};
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
    DEFAULT_LISTEN_BACKLOG, Error, IpEndpoint, IssueResult, MAX_UDP_PAYLOAD, Proactor, Rejected,
    Result, SocketContext, SocketOp,
};

/// The two socket flavors of the transport: connection-oriented byte streams
/// and connectionless datagrams, both IPv4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// A TCP stream socket.
    Tcp,
    /// A UDP datagram socket.
    Udp,
}

/// Which direction(s) of a connected socket to shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketShutdown {
    /// No more receives.
    Receive,
    /// No more sends; the peer observes end-of-stream.
    Send,
    /// Both directions.
    Both,
}

impl SocketShutdown {
    const fn how(self) -> libc::c_int {
        match self {
            Self::Receive => libc::SHUT_RD,
            Self::Send => libc::SHUT_WR,
            Self::Both => libc::SHUT_RDWR,
        }
    }
}

/// An IPv4 socket with the dual synchronous/asynchronous contract.
///
/// Every verb exists in two forms. The `*_async` issuers never block: they
/// validate, stamp the context and start the operation, returning once it is
/// pending (completion is later delivered through the context's delegate by a
/// reactor the socket was [`associate`][1]d with). The synchronous wrappers
/// issue the *identical* operation bound to a private waitable, block on it
/// up to an optional timeout (infinite by default), cancel on timeout, and
/// translate the completed context into a plain result. Synchronous use
/// requires no reactor at all.
///
/// Send and receive report at most one partial chunk per completion; a caller
/// that needs an exact total loops, re-slicing the buffer by the transferred
/// count. A peer that closes cleanly completes a receive with zero bytes
/// transferred - success, not an error.
///
/// # Teardown
///
/// [`close()`][2] (also run on drop) cancels outstanding operations and
/// blocks until every one of them has been delivered before releasing the
/// descriptor. Reactor-routed completions are delivered by `Proactor::run`,
/// so a reactor serving this socket must keep being driven until the close
/// returns.
///
/// # Thread safety
///
/// This type is thread-safe.
///
/// [1]: Self::associate
/// [2]: Self::close
#[derive(Debug)]
pub struct Socket {
    shared: Arc<SocketShared>,
}

#[derive(Debug)]
pub(crate) struct SocketShared {
    kind: SocketKind,
    weak: Weak<SocketShared>,
    fd: Mutex<Option<OwnedFd>>,
    ops: OpTable<SocketContext>,
    pending: Arc<PendingOps>,
    wake: pal::WakePipe,
    assoc: Mutex<Option<Arc<Association>>>,
}

impl Socket {
    /// Creates an unbound, non-blocking socket of the given kind.
    pub fn new(kind: SocketKind) -> Result<Self> {
        let fd = match kind {
            SocketKind::Tcp => pal::socket::new_tcp(),
            SocketKind::Udp => pal::socket::new_udp(),
        }
        .map_err(Error::StdIo)?;
        let wake = pal::WakePipe::new().map_err(Error::StdIo)?;

        Ok(Self {
            shared: Arc::new_cyclic(|weak| SocketShared {
                kind,
                weak: weak.clone(),
                fd: Mutex::new(Some(fd)),
                ops: OpTable::new(),
                pending: PendingOps::new(),
                wake,
                assoc: Mutex::new(None),
            }),
        })
    }

    /// The kind this socket was created as.
    #[must_use]
    pub fn kind(&self) -> SocketKind {
        self.shared.kind
    }

    /// Whether the underlying descriptor is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.raw_fd().is_some()
    }

    /// The number of operations issued on this socket and not yet delivered.
    #[must_use]
    pub fn pending_operations(&self) -> usize {
        self.shared.pending.current()
    }

    /// Binds the socket to a local endpoint. Servers bind before listening;
    /// port zero lets the kernel pick a free port.
    pub fn bind(&self, endpoint: IpEndpoint) -> Result<()> {
        let fd = self.shared.require_fd()?;
        pal::socket::bind_ipv4(fd, endpoint).map_err(Error::StdIo)
    }

    /// Starts listening for inbound connections with the default backlog.
    pub fn listen(&self) -> Result<()> {
        self.listen_with_backlog(DEFAULT_LISTEN_BACKLOG)
    }

    /// Starts listening with an explicit backlog.
    pub fn listen_with_backlog(&self, backlog: i32) -> Result<()> {
        let fd = self.shared.require_fd()?;
        pal::socket::listen(fd, backlog).map_err(Error::StdIo)
    }

    /// The endpoint the socket is bound to; useful after binding to port
    /// zero to learn the kernel-chosen port.
    pub fn local_endpoint(&self) -> Result<IpEndpoint> {
        let fd = self.shared.require_fd()?;
        pal::socket::local_endpoint(fd).map_err(Error::StdIo)
    }

    /// Registers this socket with a reactor so asynchronous completions can
    /// be routed back to it. A socket can be associated with at most one
    /// reactor; synchronous wrappers never require association.
    pub fn associate(&self, proactor: &Proactor) -> Result<()> {
        let mut slot = self.shared.assoc.lock().expect(crate::ERR_POISONED_LOCK);
        if slot.is_some() {
            return Err(Error::AlreadyAssociated);
        }
        let fd = self.shared.require_fd()?;

        let assoc = Arc::new(Association::new(Arc::clone(proactor.shared())));
        assoc.track(fd, self.shared.portal())?;
        *slot = Some(assoc);
        Ok(())
    }

    /// Whether the socket has data (or, when listening, a connection) ready
    /// to be received without blocking. Zero-timeout probe.
    pub fn can_read(&self) -> Result<bool> {
        let fd = self.shared.require_fd()?;
        Ok(pal::poll::probe(fd, Interest::READABLE)
            .map_err(Error::StdIo)?
            .readable)
    }

    /// Whether the socket can accept more outbound data without blocking.
    /// Zero-timeout probe.
    pub fn can_write(&self) -> Result<bool> {
        let fd = self.shared.require_fd()?;
        Ok(pal::poll::probe(fd, Interest::WRITABLE)
            .map_err(Error::StdIo)?
            .writable)
    }

    /// Shuts down one or both directions of a connected socket. Data already
    /// in flight is still delivered; use before [`close()`][Self::close] for
    /// a graceful teardown.
    pub fn shutdown(&self, how: SocketShutdown) -> Result<()> {
        let fd = self.shared.require_fd()?;
        pal::socket::shutdown(fd, how.how()).map_err(Error::StdIo)
    }

    /// Cancels every outstanding operation on this socket. Canceled
    /// operations still complete (with [`Error::Canceled`]) through their
    /// normal delivery path and still count as pending until delivered.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Cancels outstanding operations, waits until every pending completion
    /// has been delivered, and releases the descriptor. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }

    // --- the asynchronous issuers ---

    /// Starts accepting one inbound connection. The context must carry a
    /// pre-created, not-yet-connected socket (see
    /// [`SocketContext::set_accept_socket`]); on completion that socket has
    /// become the server side of the accepted connection and the context
    /// carries the peer endpoint.
    pub fn accept_async(&self, context: SocketContext) -> IssueResult<SocketContext> {
        self.shared.start(context, SocketOp::Accept, Route::Reactor)
    }

    /// Starts connecting to the endpoint in the context.
    pub fn connect_async(&self, context: SocketContext) -> IssueResult<SocketContext> {
        self.shared.start(context, SocketOp::Connect, Route::Reactor)
    }

    /// Starts a graceful disconnect. With the context's reuse flag set, the
    /// socket is renewed afterwards and can connect again.
    pub fn disconnect_async(&self, context: SocketContext) -> IssueResult<SocketContext> {
        self.shared
            .start(context, SocketOp::Disconnect, Route::Reactor)
    }

    /// Starts sending the context's buffer on a connected socket. Completion
    /// reports one (possibly partial) chunk.
    pub fn send_async(&self, context: SocketContext) -> IssueResult<SocketContext> {
        self.shared.start(context, SocketOp::Send, Route::Reactor)
    }

    /// Starts receiving into the context's buffer on a connected socket.
    pub fn receive_async(&self, context: SocketContext) -> IssueResult<SocketContext> {
        self.shared.start(context, SocketOp::Receive, Route::Reactor)
    }

    /// Starts sending the context's buffer as one datagram to the context's
    /// endpoint. Payloads above [`MAX_UDP_PAYLOAD`] are rejected outright.
    pub fn send_to_async(&self, context: SocketContext) -> IssueResult<SocketContext> {
        self.shared.start(context, SocketOp::SendTo, Route::Reactor)
    }

    /// Starts receiving one datagram into the context's buffer; completion
    /// stores the source endpoint in the context.
    pub fn receive_from_async(&self, context: SocketContext) -> IssueResult<SocketContext> {
        self.shared
            .start(context, SocketOp::ReceiveFrom, Route::Reactor)
    }

    // --- the synchronous wrappers ---

    /// Accepts one inbound connection, waiting up to `timeout` (`None` waits
    /// indefinitely). Returns the connected socket.
    pub fn accept(&self, timeout: Option<Duration>) -> Result<Socket> {
        let peer = Socket::new(self.shared.kind)?;
        let mut context = SocketContext::new();
        context.set_accept_socket(peer);

        let mut outcome =
            self.run_sync(context, SocketOp::Accept, Interest::READABLE, timeout)?;
        bridge::fold_outcome(&mut outcome, SocketContext::take_error)?;
        outcome.context.take_accept_socket().ok_or_else(|| {
            Error::ContractViolation("accept completed without its socket".to_string())
        })
    }

    /// Connects to a remote endpoint, waiting up to `timeout`.
    pub fn connect(&self, endpoint: IpEndpoint, timeout: Option<Duration>) -> Result<()> {
        let mut context = SocketContext::new();
        context.set_remote_endpoint(endpoint);

        let mut outcome =
            self.run_sync(context, SocketOp::Connect, Interest::WRITABLE, timeout)?;
        bridge::fold_outcome(&mut outcome, SocketContext::take_error)
    }

    /// Gracefully disconnects. With `reuse`, the socket is renewed and can
    /// connect again; without it, only [`close()`][Self::close] remains
    /// useful.
    pub fn disconnect(&self, reuse: bool) -> Result<()> {
        let mut context = SocketContext::new();
        context.set_reuse(reuse);

        let mut outcome =
            self.run_sync(context, SocketOp::Disconnect, Interest::WRITABLE, None)?;
        bridge::fold_outcome(&mut outcome, SocketContext::take_error)
    }

    /// Sends one chunk of `buffer`, waiting up to `timeout`. Returns the
    /// buffer and the number of bytes actually sent; callers needing to send
    /// everything loop, advancing the buffer by the transferred count.
    pub fn send(
        &self,
        buffer: BytesMut,
        timeout: Option<Duration>,
    ) -> Result<(BytesMut, usize)> {
        let context = SocketContext::with_buffer(buffer);
        let mut outcome = self.run_sync(context, SocketOp::Send, Interest::WRITABLE, timeout)?;
        bridge::fold_outcome(&mut outcome, SocketContext::take_error)?;
        let transferred = outcome.context.transferred();
        Ok((outcome.context.take_buffer(), transferred))
    }

    /// Receives one chunk into the spare capacity of `buffer`, waiting up to
    /// `timeout`. Returns the buffer and the transferred count; zero means
    /// the peer closed cleanly.
    pub fn receive(
        &self,
        buffer: BytesMut,
        timeout: Option<Duration>,
    ) -> Result<(BytesMut, usize)> {
        let context = SocketContext::with_buffer(buffer);
        let mut outcome =
            self.run_sync(context, SocketOp::Receive, Interest::READABLE, timeout)?;
        bridge::fold_outcome(&mut outcome, SocketContext::take_error)?;
        let transferred = outcome.context.transferred();
        Ok((outcome.context.take_buffer(), transferred))
    }

    /// Sends `buffer` as one datagram to `endpoint`, waiting up to `timeout`.
    /// Payloads above [`MAX_UDP_PAYLOAD`] fail with zero bytes transferred.
    pub fn send_to(
        &self,
        buffer: BytesMut,
        endpoint: IpEndpoint,
        timeout: Option<Duration>,
    ) -> Result<(BytesMut, usize)> {
        let mut context = SocketContext::with_buffer(buffer);
        context.set_remote_endpoint(endpoint);

        let mut outcome = self.run_sync(context, SocketOp::SendTo, Interest::WRITABLE, timeout)?;
        bridge::fold_outcome(&mut outcome, SocketContext::take_error)?;
        let transferred = outcome.context.transferred();
        Ok((outcome.context.take_buffer(), transferred))
    }

    /// Receives one datagram into the spare capacity of `buffer`, waiting up
    /// to `timeout`. Returns the buffer, the transferred count and the source
    /// endpoint.
    pub fn receive_from(
        &self,
        buffer: BytesMut,
        timeout: Option<Duration>,
    ) -> Result<(BytesMut, usize, IpEndpoint)> {
        let context = SocketContext::with_buffer(buffer);
        let mut outcome =
            self.run_sync(context, SocketOp::ReceiveFrom, Interest::READABLE, timeout)?;
        bridge::fold_outcome(&mut outcome, SocketContext::take_error)?;

        let transferred = outcome.context.transferred();
        let endpoint = outcome.context.remote_endpoint().ok_or_else(|| {
            Error::ContractViolation("datagram arrived without a source endpoint".to_string())
        })?;
        Ok((outcome.context.take_buffer(), transferred, endpoint))
    }

    fn run_sync(
        &self,
        context: SocketContext,
        op: SocketOp,
        interest: Interest,
        timeout: Option<Duration>,
    ) -> Result<SyncOutcome<SocketContext>> {
        let (tx, rx) = sync_channel(1);
        self.shared
            .start(context, op, Route::Private(tx))
            .map_err(Error::from)?;

        let fd = self.shared.raw_fd().map(|fd| (fd, interest));
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

impl Drop for Socket {
    fn drop(&mut self) {
        if std::thread::panicking() {
            // Skip the orderly drain when unwinding; releasing the descriptor
            // is all that still matters.
            let _ = self.shared.fd.lock().map(|mut fd| fd.take());
            return;
        }
        self.shared.close();
    }
}

impl SocketShared {
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

    fn portal(&self) -> Weak<dyn Portal> {
        self.weak.clone()
    }

    fn validate(&self, op: SocketOp, context: &SocketContext) -> Result<()> {
        match op {
            SocketOp::Send => {
                if context.buffer().is_empty() {
                    return Err(Error::ContractViolation(
                        "send requires a non-empty buffer".to_string(),
                    ));
                }
            }
            SocketOp::SendTo => {
                if context.buffer().is_empty() {
                    return Err(Error::ContractViolation(
                        "send-to requires a non-empty buffer".to_string(),
                    ));
                }
                if context.remote_endpoint().is_none() {
                    return Err(Error::ContractViolation(
                        "send-to requires a destination endpoint".to_string(),
                    ));
                }
                if context.buffer().len() > MAX_UDP_PAYLOAD {
                    return Err(Error::DatagramTooLarge {
                        size: context.buffer().len(),
                        limit: MAX_UDP_PAYLOAD,
                    });
                }
            }
            SocketOp::Receive | SocketOp::ReceiveFrom => {
                if context.buffer().capacity() == context.buffer().len() {
                    return Err(Error::ContractViolation(
                        "receive requires spare buffer capacity".to_string(),
                    ));
                }
            }
            SocketOp::Connect => {
                if context.remote_endpoint().is_none() {
                    return Err(Error::ContractViolation(
                        "connect requires a remote endpoint".to_string(),
                    ));
                }
            }
            SocketOp::Accept => match context.accept_socket() {
                Some(peer) if peer.is_open() => {}
                _ => {
                    return Err(Error::ContractViolation(
                        "accept requires a pre-created open socket".to_string(),
                    ));
                }
            },
            SocketOp::Disconnect => {}
        }
        Ok(())
    }

    fn start(
        self: &Arc<Self>,
        mut context: SocketContext,
        op: SocketOp,
        route: Route<SocketContext>,
    ) -> IssueResult<SocketContext> {
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
        event!(Level::TRACE, message = "socket operation issued", ?op, fd);

        match self.attempt_initial(fd, &mut context) {
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

    /// First attempt, at issue time. Connect must actually start here; the
    /// other verbs use the same syscall for start and finish.
    fn attempt_initial(&self, fd: RawFd, context: &mut SocketContext) -> Attempt {
        if context.last_op() == Some(SocketOp::Connect) {
            let Some(endpoint) = context.remote_endpoint() else {
                return contract_failure("connect lost its endpoint");
            };
            return match pal::socket::connect_ipv4(fd, endpoint) {
                Ok(()) => Attempt::Finished {
                    error: None,
                    transferred: 0,
                },
                Err(error) if pal::is_in_progress(&error) || pal::is_would_block(&error) => {
                    Attempt::Pending(Interest::WRITABLE)
                }
                Err(error) => failure(error),
            };
        }
        self.attempt_finish(fd, context)
    }

    /// Finish attempt, used for parked operations (and, except for connect,
    /// at issue time too).
    fn attempt_finish(&self, fd: RawFd, context: &mut SocketContext) -> Attempt {
        match context.last_op() {
            Some(SocketOp::Receive) => match pal::socket::recv(fd, context.buffer_mut()) {
                Ok(n) => Attempt::Finished {
                    error: None,
                    transferred: n,
                },
                Err(error) if pal::is_would_block(&error) => Attempt::Pending(Interest::READABLE),
                Err(error) => failure(error),
            },
            Some(SocketOp::Send) => match pal::socket::send(fd, context.buffer()) {
                Ok(n) => Attempt::Finished {
                    error: None,
                    transferred: n,
                },
                Err(error) if pal::is_would_block(&error) => Attempt::Pending(Interest::WRITABLE),
                Err(error) => failure(error),
            },
            Some(SocketOp::SendTo) => {
                let Some(endpoint) = context.remote_endpoint() else {
                    return contract_failure("send-to lost its endpoint");
                };
                match pal::socket::send_to(fd, context.buffer(), endpoint) {
                    Ok(n) => Attempt::Finished {
                        error: None,
                        transferred: n,
                    },
                    Err(error) if pal::is_would_block(&error) => {
                        Attempt::Pending(Interest::WRITABLE)
                    }
                    Err(error) => failure(error),
                }
            }
            Some(SocketOp::ReceiveFrom) => match pal::socket::recv_from(fd, context.buffer_mut())
            {
                Ok((n, endpoint)) => {
                    context.set_completed_endpoint(endpoint);
                    Attempt::Finished {
                        error: None,
                        transferred: n,
                    }
                }
                Err(error) if pal::is_would_block(&error) => Attempt::Pending(Interest::READABLE),
                Err(error) => failure(error),
            },
            Some(SocketOp::Accept) => match pal::socket::accept_ipv4(fd) {
                Ok((conn, peer_endpoint)) => {
                    let outcome = match context.accept_socket() {
                        Some(peer) => peer.shared.adopt(conn),
                        None => Err(Error::ContractViolation(
                            "accept lost its socket".to_string(),
                        )),
                    };
                    match outcome {
                        Ok(()) => {
                            context.set_completed_endpoint(peer_endpoint);
                            Attempt::Finished {
                                error: None,
                                transferred: 0,
                            }
                        }
                        Err(error) => Attempt::Finished {
                            error: Some(error),
                            transferred: 0,
                        },
                    }
                }
                Err(error) if pal::is_would_block(&error) => Attempt::Pending(Interest::READABLE),
                Err(error) => failure(error),
            },
            Some(SocketOp::Connect) => {
                // A parked connect finishes when the descriptor turns
                // writable; the deferred error tells success from failure.
                match pal::poll::probe(fd, Interest::WRITABLE) {
                    Ok(ready) if !ready.writable => Attempt::Pending(Interest::WRITABLE),
                    Ok(_) => match pal::socket::take_socket_error(fd) {
                        Ok(None) => Attempt::Finished {
                            error: None,
                            transferred: 0,
                        },
                        Ok(Some(error)) | Err(error) => failure(error),
                    },
                    Err(error) => failure(error),
                }
            }
            Some(SocketOp::Disconnect) => {
                let result = pal::socket::shutdown(fd, libc::SHUT_RDWR);
                if let Err(error) = result {
                    // Disconnecting a never-connected socket is a no-op.
                    if error.raw_os_error() != Some(libc::ENOTCONN) {
                        return failure(error);
                    }
                }

                if context.reuse() {
                    if let Err(error) = self.renew(fd) {
                        return Attempt::Finished {
                            error: Some(error),
                            transferred: 0,
                        };
                    }
                }
                Attempt::Finished {
                    error: None,
                    transferred: 0,
                }
            }
            None => contract_failure("operation context was never stamped"),
        }
    }

    /// Transplants an accepted connection into this (pre-created, unbound)
    /// socket, refreshing its reactor registration if it has one: the old
    /// descriptor registration died with the old open file description.
    fn adopt(&self, conn: OwnedFd) -> Result<()> {
        let fd = self.require_fd()?;
        pal::socket::transplant(fd, conn).map_err(Error::StdIo)?;

        if let Some(assoc) = self.assoc() {
            assoc.untrack(fd);
            assoc.track(fd, self.weak.clone())?;
        }
        Ok(())
    }

    /// Replaces the descriptor with a fresh unconnected socket of the same
    /// kind, keeping the number (and thus any reactor registration keys)
    /// stable across a disconnect-for-reuse.
    fn renew(&self, fd: RawFd) -> Result<()> {
        let fresh = match self.kind {
            SocketKind::Tcp => pal::socket::new_tcp(),
            SocketKind::Udp => pal::socket::new_udp(),
        }
        .map_err(Error::StdIo)?;
        pal::socket::transplant(fd, fresh).map_err(Error::StdIo)?;

        if let Some(assoc) = self.assoc() {
            assoc.untrack(fd);
            assoc.track(fd, self.weak.clone())?;
        }
        Ok(())
    }

    fn drive(&self, scope: DriveScope) {
        let Some(fd) = self.raw_fd() else {
            return;
        };
        let assoc = self.assoc();

        let finished = self.ops.drive(scope, |context| self.attempt_finish(fd, context));
        deliver_all(assoc.as_ref().map(|a| a.proactor()), finished);

        if scope == DriveScope::Reactor {
            if let Some(assoc) = assoc {
                assoc.rearm(fd, self.ops.reactor_interest(fd));
            }
        }
    }

    fn cancel(&self) {
        let finished = self.ops.cancel_all();
        if !finished.is_empty() {
            event!(
                Level::DEBUG,
                message = "socket operations canceled",
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
            event!(Level::DEBUG, message = "socket closed");
        }
    }
}

impl Portal for SocketShared {
    fn on_ready(&self) {
        self.drive(DriveScope::Reactor);
    }
}

// Reached only through engine defects; the message names the broken invariant.
fn contract_failure(message: &str) -> Attempt {
    Attempt::Finished {
        error: Some(Error::ContractViolation(message.to_string())),
        transferred: 0,
    }
}

fn failure(error: std::io::Error) -> Attempt {
    Attempt::Finished {
        error: Some(Error::StdIo(error)),
        transferred: 0,
    }
}
