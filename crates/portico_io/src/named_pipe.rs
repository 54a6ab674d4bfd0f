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
    Error, IssueResult, PipeContext, PipeOp, Proactor, Rejected, Result,
};

/// Which way data flows through a pipe, from the owning object's own
/// perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeDirection {
    /// This end only reads.
    In,
    /// This end only writes.
    Out,
    /// This end reads and writes.
    Duplex,
}

impl PipeDirection {
    const fn can_read(self) -> bool {
        matches!(self, Self::In | Self::Duplex)
    }

    const fn can_write(self) -> bool {
        matches!(self, Self::Out | Self::Duplex)
    }
}

/// How bytes travel through the pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeTransmission {
    /// An undifferentiated byte stream; reads and writes have no
    /// correlation.
    Byte,
    /// Message datagrams: each write is one message, and one read never
    /// returns more than one message's worth of bytes, even if the buffer is
    /// larger. A message larger than the reader's buffer is truncated to the
    /// buffer.
    Message,
}

/// Creation options of a pipe server.
#[derive(Debug, Clone, Copy)]
pub struct PipeOptions {
    /// How many clients may be waiting to connect (the listen backlog).
    pub max_instances: u32,
    /// Kernel send-buffer size applied to each session; zero keeps the
    /// platform default.
    pub out_buffer_size: usize,
    /// Kernel receive-buffer size applied to each session; zero keeps the
    /// platform default.
    pub in_buffer_size: usize,
    /// Timeout applied by the synchronous verbs when the caller passes
    /// `None`; `None` here means wait indefinitely.
    pub default_timeout: Option<Duration>,
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self {
            max_instances: 1,
            out_buffer_size: 0,
            in_buffer_size: 0,
            default_timeout: None,
        }
    }
}

/// What a [`peek`][NamedPipeServer::peek] observed without consuming
/// anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeekInfo {
    /// Bytes copied into the peek buffer.
    pub bytes_read: usize,
    /// Bytes that a read could consume right now (for message mode, the size
    /// of the next message).
    pub bytes_available: usize,
    /// In message mode, bytes of the next message that did not fit the peek
    /// buffer; always zero in byte mode.
    pub bytes_left_this_message: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipeRole {
    Server,
    Client,
}

/// The server end of a named pipe: creates the rendezvous name, accepts one
/// client session at a time, and exchanges data with it.
///
/// The name is an opaque path-like string establishing a platform rendezvous
/// namespace. [`disconnect()`][1] tears down only the current client's
/// session; the pipe object survives and accepts the next client, which is
/// how a single pipe serves a sequence of clients.
///
/// Reads, writes and accepts follow the same dual synchronous/asynchronous
/// contract as the socket transport, including cancellation on timeout and
/// the drain-before-close teardown.
///
/// # Thread safety
///
/// This type is thread-safe.
///
/// [1]: Self::disconnect
#[derive(Debug)]
pub struct NamedPipeServer {
    shared: Arc<PipeShared>,
}

/// The client end of a named pipe: opens an existing pipe by name.
///
/// The client must open the pipe with the same transmission mode the server
/// created it with.
///
/// # Thread safety
///
/// This type is thread-safe.
#[derive(Debug)]
pub struct NamedPipeClient {
    shared: Arc<PipeShared>,
}

#[derive(Debug)]
struct PipeShared {
    role: PipeRole,
    direction: PipeDirection,
    transmission: PipeTransmission,
    default_timeout: Option<Duration>,
    out_buffer_size: usize,
    in_buffer_size: usize,
    name: PathBuf,
    weak: Weak<PipeShared>,
    /// The rendezvous listener; servers only.
    listener: Mutex<Option<OwnedFd>>,
    /// The data descriptor: the current client session (server) or the
    /// connection (client).
    session: Mutex<Option<OwnedFd>>,
    ops: OpTable<PipeContext>,
    pending: Arc<PendingOps>,
    wake: pal::WakePipe,
    assoc: Mutex<Option<Arc<Association>>>,
}

fn new_pipe_socket(transmission: PipeTransmission) -> std::io::Result<OwnedFd> {
    match transmission {
        PipeTransmission::Byte => pal::socket::new_unix_stream(),
        PipeTransmission::Message => pal::socket::new_unix_seqpacket(),
    }
}

impl NamedPipeServer {
    /// Creates the pipe under `name`, taking over a stale rendezvous left by
    /// a dead server, and starts listening for clients.
    pub fn new(
        name: impl AsRef<Path>,
        direction: PipeDirection,
        transmission: PipeTransmission,
        options: PipeOptions,
    ) -> Result<Self> {
        let name = name.as_ref().to_path_buf();
        let listener = new_pipe_socket(transmission).map_err(Error::StdIo)?;

        // A previous server instance that died without cleanup leaves the
        // rendezvous name behind; creating a server claims the name.
        let _ = std::fs::remove_file(&name);
        pal::socket::bind_unix(listener.as_raw_fd(), &name).map_err(Error::StdIo)?;
        pal::socket::listen(
            listener.as_raw_fd(),
            i32::try_from(options.max_instances.max(1)).unwrap_or(1),
        )
        .map_err(Error::StdIo)?;

        let wake = pal::WakePipe::new().map_err(Error::StdIo)?;
        event!(Level::DEBUG, message = "pipe created", name = %name.display());

        Ok(Self {
            shared: Arc::new_cyclic(|weak| PipeShared {
                role: PipeRole::Server,
                direction,
                transmission,
                default_timeout: options.default_timeout,
                out_buffer_size: options.out_buffer_size,
                in_buffer_size: options.in_buffer_size,
                name,
                weak: weak.clone(),
                listener: Mutex::new(Some(listener)),
                session: Mutex::new(None),
                ops: OpTable::new(),
                pending: PendingOps::new(),
                wake,
                assoc: Mutex::new(None),
            }),
        })
    }

    /// Registers this pipe with a reactor; required before `*_async` verbs.
    pub fn associate(&self, proactor: &Proactor) -> Result<()> {
        self.shared.associate(proactor)
    }

    /// Waits for one client to connect, up to `timeout` (`None` applies the
    /// creation-time default timeout).
    pub fn accept(&self, timeout: Option<Duration>) -> Result<()> {
        let context = PipeContext::new();
        let mut outcome = self.shared.run_sync(
            context,
            PipeOp::Accept,
            Interest::READABLE,
            timeout,
        )?;
        bridge::fold_outcome(&mut outcome, PipeContext::take_error)
    }

    /// Starts accepting one client; completion fires once the session is
    /// established.
    pub fn accept_async(&self, context: PipeContext) -> IssueResult<PipeContext> {
        self.shared.start(context, PipeOp::Accept, Route::Reactor)
    }

    /// Tears down the current client's session without destroying the pipe;
    /// the next [`accept`][Self::accept] serves a new client.
    pub fn disconnect(&self) -> Result<()> {
        self.shared.drop_session();
        Ok(())
    }

    /// Reads one chunk from the connected client; see
    /// [`NamedPipeClient::read`] for the shared semantics.
    pub fn read(
        &self,
        buffer: BytesMut,
        timeout: Option<Duration>,
    ) -> Result<(BytesMut, usize)> {
        self.shared.read(buffer, timeout)
    }

    /// Starts reading one chunk from the connected client.
    pub fn read_async(&self, context: PipeContext) -> IssueResult<PipeContext> {
        self.shared.start(context, PipeOp::Read, Route::Reactor)
    }

    /// Writes one chunk to the connected client; see
    /// [`NamedPipeClient::write`] for the shared semantics.
    pub fn write(
        &self,
        buffer: BytesMut,
        timeout: Option<Duration>,
    ) -> Result<(BytesMut, usize)> {
        self.shared.write(buffer, timeout)
    }

    /// Starts writing one chunk to the connected client.
    pub fn write_async(&self, context: PipeContext) -> IssueResult<PipeContext> {
        self.shared.start(context, PipeOp::Write, Route::Reactor)
    }

    /// Observes buffered inbound data without consuming it. Synchronous
    /// only; an empty pipe reports zeroes rather than blocking.
    pub fn peek(&self, buffer: BytesMut) -> Result<(BytesMut, PeekInfo)> {
        self.shared.peek(buffer)
    }

    /// Cancels every outstanding operation on this pipe.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Cancels, drains, and releases both the session and the rendezvous.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Whether a client session is currently established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.session_fd().is_some()
    }

    /// The number of operations issued on this pipe and not yet delivered.
    #[must_use]
    pub fn pending_operations(&self) -> usize {
        self.shared.pending.current()
    }
}

impl NamedPipeClient {
    /// Opens an existing pipe by name. `transmission` must match the mode
    /// the server created the pipe with.
    pub fn new(
        name: impl AsRef<Path>,
        direction: PipeDirection,
        transmission: PipeTransmission,
    ) -> Result<Self> {
        let name = name.as_ref().to_path_buf();
        let connection = new_pipe_socket(transmission).map_err(Error::StdIo)?;
        pal::socket::connect_unix(connection.as_raw_fd(), &name).map_err(Error::StdIo)?;

        let wake = pal::WakePipe::new().map_err(Error::StdIo)?;

        Ok(Self {
            shared: Arc::new_cyclic(|weak| PipeShared {
                role: PipeRole::Client,
                direction,
                transmission,
                default_timeout: None,
                out_buffer_size: 0,
                in_buffer_size: 0,
                name,
                weak: weak.clone(),
                listener: Mutex::new(None),
                session: Mutex::new(Some(connection)),
                ops: OpTable::new(),
                pending: PendingOps::new(),
                wake,
                assoc: Mutex::new(None),
            }),
        })
    }

    /// Registers this pipe with a reactor; required before `*_async` verbs.
    pub fn associate(&self, proactor: &Proactor) -> Result<()> {
        self.shared.associate(proactor)
    }

    /// Reads one chunk into the spare capacity of `buffer`, waiting up to
    /// `timeout`. Returns the buffer and the transferred count; zero means
    /// the peer closed its end. In message mode one read never spans two
    /// messages.
    pub fn read(
        &self,
        buffer: BytesMut,
        timeout: Option<Duration>,
    ) -> Result<(BytesMut, usize)> {
        self.shared.read(buffer, timeout)
    }

    /// Starts reading one chunk.
    pub fn read_async(&self, context: PipeContext) -> IssueResult<PipeContext> {
        self.shared.start(context, PipeOp::Read, Route::Reactor)
    }

    /// Writes one chunk (byte mode) or one message (message mode), waiting
    /// up to `timeout`. Returns the buffer and the transferred count.
    pub fn write(
        &self,
        buffer: BytesMut,
        timeout: Option<Duration>,
    ) -> Result<(BytesMut, usize)> {
        self.shared.write(buffer, timeout)
    }

    /// Starts writing one chunk.
    pub fn write_async(&self, context: PipeContext) -> IssueResult<PipeContext> {
        self.shared.start(context, PipeOp::Write, Route::Reactor)
    }

    /// Observes buffered inbound data without consuming it. Synchronous
    /// only; an empty pipe reports zeroes rather than blocking.
    pub fn peek(&self, buffer: BytesMut) -> Result<(BytesMut, PeekInfo)> {
        self.shared.peek(buffer)
    }

    /// Cancels every outstanding operation on this pipe.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Cancels, drains, and releases the connection.
    pub fn close(&self) {
        self.shared.close();
    }

    /// The number of operations issued on this pipe and not yet delivered.
    #[must_use]
    pub fn pending_operations(&self) -> usize {
        self.shared.pending.current()
    }
}

impl Drop for NamedPipeServer {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        self.shared.close();
    }
}

impl Drop for NamedPipeClient {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        self.shared.close();
    }
}

impl PipeShared {
    fn listener_fd(&self) -> Option<RawFd> {
        self.listener
            .lock()
            .expect(crate::ERR_POISONED_LOCK)
            .as_ref()
            .map(AsRawFd::as_raw_fd)
    }

    fn session_fd(&self) -> Option<RawFd> {
        self.session
            .lock()
            .expect(crate::ERR_POISONED_LOCK)
            .as_ref()
            .map(AsRawFd::as_raw_fd)
    }

    fn assoc(&self) -> Option<Arc<Association>> {
        self.assoc.lock().expect(crate::ERR_POISONED_LOCK).clone()
    }

    fn associate(&self, proactor: &Proactor) -> Result<()> {
        let mut slot = self.assoc.lock().expect(crate::ERR_POISONED_LOCK);
        if slot.is_some() {
            return Err(Error::AlreadyAssociated);
        }

        let assoc = Arc::new(Association::new(Arc::clone(proactor.shared())));
        match self.role {
            PipeRole::Server => {
                let fd = self.listener_fd().ok_or(Error::ClosedHandle)?;
                assoc.track(fd, self.weak.clone())?;
                // A session may already exist from an earlier synchronous
                // accept; route its readiness too.
                if let Some(session) = self.session_fd() {
                    assoc.track(session, self.weak.clone())?;
                }
            }
            PipeRole::Client => {
                let fd = self.session_fd().ok_or(Error::ClosedHandle)?;
                assoc.track(fd, self.weak.clone())?;
            }
        }
        *slot = Some(assoc);
        Ok(())
    }

    /// Which descriptor carries the given verb.
    fn fd_for(&self, op: PipeOp) -> Option<RawFd> {
        match op {
            PipeOp::Accept => self.listener_fd(),
            PipeOp::Read | PipeOp::Write => self.session_fd(),
        }
    }

    fn validate(&self, op: PipeOp, context: &PipeContext) -> Result<()> {
        match op {
            PipeOp::Accept => {
                if self.role != PipeRole::Server {
                    return Err(Error::ContractViolation(
                        "only the server end accepts clients".to_string(),
                    ));
                }
                if self.session_fd().is_some() {
                    return Err(Error::ContractViolation(
                        "pipe already has a connected client; disconnect first".to_string(),
                    ));
                }
            }
            PipeOp::Read => {
                if !self.direction.can_read() {
                    return Err(Error::ContractViolation(
                        "pipe was opened outbound-only".to_string(),
                    ));
                }
                if context.buffer().capacity() == context.buffer().len() {
                    return Err(Error::ContractViolation(
                        "read requires spare buffer capacity".to_string(),
                    ));
                }
            }
            PipeOp::Write => {
                if !self.direction.can_write() {
                    return Err(Error::ContractViolation(
                        "pipe was opened inbound-only".to_string(),
                    ));
                }
                if context.buffer().is_empty() {
                    return Err(Error::ContractViolation(
                        "write requires a non-empty buffer".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn start(
        &self,
        mut context: PipeContext,
        op: PipeOp,
        route: Route<PipeContext>,
    ) -> IssueResult<PipeContext> {
        let assoc = self.assoc();
        if matches!(route, Route::Reactor) && assoc.is_none() {
            return Err(Rejected::new(Error::NotAssociated, context));
        }

        if let Err(error) = self.validate(op, &context) {
            return Err(Rejected::new(error, context));
        }
        let Some(fd) = self.fd_for(op) else {
            return Err(Rejected::new(Error::ClosedHandle, context));
        };

        context.stamp(op);
        let guard = self.pending.begin();
        event!(Level::TRACE, message = "pipe operation issued", ?op, fd);

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

    fn attempt(&self, context: &mut PipeContext) -> Attempt {
        match context.last_op() {
            Some(PipeOp::Accept) => {
                let Some(listener) = self.listener_fd() else {
                    return finished_with(Error::ClosedHandle);
                };
                match pal::socket::accept_unix(listener) {
                    Ok(session) => match self.install_session(session) {
                        Ok(()) => Attempt::Finished {
                            error: None,
                            transferred: 0,
                        },
                        Err(error) => finished_with(error),
                    },
                    Err(error) if pal::is_would_block(&error) => {
                        Attempt::Pending(Interest::READABLE)
                    }
                    Err(error) => finished_with(Error::StdIo(error)),
                }
            }
            Some(PipeOp::Read) => {
                let Some(fd) = self.session_fd() else {
                    return finished_with(Error::ClosedHandle);
                };
                match pal::socket::recv(fd, context.buffer_mut()) {
                    Ok(n) => Attempt::Finished {
                        error: None,
                        transferred: n,
                    },
                    Err(error) if pal::is_would_block(&error) => {
                        Attempt::Pending(Interest::READABLE)
                    }
                    Err(error) => finished_with(Error::StdIo(error)),
                }
            }
            Some(PipeOp::Write) => {
                let Some(fd) = self.session_fd() else {
                    return finished_with(Error::ClosedHandle);
                };
                match pal::socket::send(fd, context.buffer()) {
                    Ok(n) => Attempt::Finished {
                        error: None,
                        transferred: n,
                    },
                    Err(error) if pal::is_would_block(&error) => {
                        Attempt::Pending(Interest::WRITABLE)
                    }
                    Err(error) => finished_with(Error::StdIo(error)),
                }
            }
            None => finished_with(Error::ContractViolation(
                "operation context was never stamped".to_string(),
            )),
        }
    }

    fn install_session(&self, session: OwnedFd) -> Result<()> {
        pal::socket::set_buffer_sizes(
            session.as_raw_fd(),
            self.out_buffer_size,
            self.in_buffer_size,
        )
        .map_err(Error::StdIo)?;

        let fd = session.as_raw_fd();
        *self.session.lock().expect(crate::ERR_POISONED_LOCK) = Some(session);

        if let Some(assoc) = self.assoc() {
            assoc.track(fd, self.weak.clone())?;
        }
        event!(Level::DEBUG, message = "pipe client connected", name = %self.name.display());
        Ok(())
    }

    fn drop_session(&self) {
        let session = self.session.lock().expect(crate::ERR_POISONED_LOCK).take();
        if let Some(session) = session {
            if let Some(assoc) = self.assoc() {
                assoc.untrack(session.as_raw_fd());
            }
            event!(Level::DEBUG, message = "pipe session dropped", name = %self.name.display());
        }
    }

    fn read(&self, buffer: BytesMut, timeout: Option<Duration>) -> Result<(BytesMut, usize)> {
        let context = PipeContext::with_buffer(buffer);
        let mut outcome = self.run_sync(context, PipeOp::Read, Interest::READABLE, timeout)?;
        bridge::fold_outcome(&mut outcome, PipeContext::take_error)?;
        let transferred = outcome.context.transferred();
        Ok((outcome.context.take_buffer(), transferred))
    }

    fn write(&self, buffer: BytesMut, timeout: Option<Duration>) -> Result<(BytesMut, usize)> {
        let context = PipeContext::with_buffer(buffer);
        let mut outcome = self.run_sync(context, PipeOp::Write, Interest::WRITABLE, timeout)?;
        bridge::fold_outcome(&mut outcome, PipeContext::take_error)?;
        let transferred = outcome.context.transferred();
        Ok((outcome.context.take_buffer(), transferred))
    }

    fn peek(&self, mut buffer: BytesMut) -> Result<(BytesMut, PeekInfo)> {
        if !self.direction.can_read() {
            return Err(Error::ContractViolation(
                "pipe was opened outbound-only".to_string(),
            ));
        }
        let fd = self.session_fd().ok_or(Error::ClosedHandle)?;

        let info = match self.transmission {
            PipeTransmission::Message => match pal::socket::peek_message(fd, &mut buffer) {
                Ok((full, copied)) => PeekInfo {
                    bytes_read: copied,
                    bytes_available: full,
                    bytes_left_this_message: full - copied,
                },
                Err(error) if pal::is_would_block(&error) => PeekInfo::default(),
                Err(error) => return Err(Error::StdIo(error)),
            },
            PipeTransmission::Byte => {
                let copied = match pal::socket::peek_stream(fd, &mut buffer) {
                    Ok(copied) => copied,
                    Err(error) if pal::is_would_block(&error) => 0,
                    Err(error) => return Err(Error::StdIo(error)),
                };
                PeekInfo {
                    bytes_read: copied,
                    bytes_available: pal::socket::bytes_available(fd).map_err(Error::StdIo)?,
                    bytes_left_this_message: 0,
                }
            }
        };

        Ok((buffer, info))
    }

    fn run_sync(
        &self,
        context: PipeContext,
        op: PipeOp,
        interest: Interest,
        timeout: Option<Duration>,
    ) -> Result<SyncOutcome<PipeContext>> {
        let (tx, rx) = sync_channel(1);
        let timeout = timeout.or(self.default_timeout);
        self.start(context, op, Route::Private(tx))
            .map_err(Error::from)?;

        let fd = self.fd_for(op).map(|fd| (fd, interest));
        bridge::block_on(
            &rx,
            timeout,
            fd,
            &self.wake,
            || self.drive(DriveScope::Private),
            || self.cancel(),
        )
    }

    fn drive(&self, scope: DriveScope) {
        let assoc = self.assoc();

        let finished = self.ops.drive(scope, |context| self.attempt(context));
        deliver_all(assoc.as_ref().map(|a| a.proactor()), finished);

        if scope == DriveScope::Reactor {
            if let Some(assoc) = assoc {
                for fd in [self.listener_fd(), self.session_fd()].into_iter().flatten() {
                    assoc.rearm(fd, self.ops.reactor_interest(fd));
                }
            }
        }
    }

    fn cancel(&self) {
        let finished = self.ops.cancel_all();
        if !finished.is_empty() {
            event!(
                Level::DEBUG,
                message = "pipe operations canceled",
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

        self.session.lock().expect(crate::ERR_POISONED_LOCK).take();
        let listener = self.listener.lock().expect(crate::ERR_POISONED_LOCK).take();
        if listener.is_some() {
            // The rendezvous name outlives the listener descriptor; remove it
            // so the namespace does not accumulate stale entries.
            let _ = std::fs::remove_file(&self.name);
        }
    }
}

impl Portal for PipeShared {
    fn on_ready(&self) {
        self.drive(DriveScope::Reactor);
    }
}

fn finished_with(error: Error) -> Attempt {
    Attempt::Finished {
        error: Some(error),
        transferred: 0,
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    fn pipe_name(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("portico-pipe-{tag}-{}", std::process::id()))
    }

    #[test]
    fn thread_safe_types() {
        assert_impl_all!(NamedPipeServer: Send, Sync);
        assert_impl_all!(NamedPipeClient: Send, Sync);
    }

    #[test]
    fn server_claims_and_releases_the_name() {
        let name = pipe_name("claim");
        let server = NamedPipeServer::new(
            &name,
            PipeDirection::Duplex,
            PipeTransmission::Byte,
            PipeOptions::default(),
        )
        .unwrap();
        assert!(name.exists());

        server.close();
        assert!(!name.exists());
    }

    #[test]
    fn read_on_outbound_pipe_is_rejected() {
        let name = pipe_name("outbound");
        let server = NamedPipeServer::new(
            &name,
            PipeDirection::Out,
            PipeTransmission::Byte,
            PipeOptions::default(),
        )
        .unwrap();

        let error = server
            .read(BytesMut::with_capacity(16), Some(Duration::from_millis(10)))
            .unwrap_err();
        assert!(matches!(error, Error::ContractViolation(_)));
    }

    #[test]
    fn client_to_missing_pipe_fails_at_setup() {
        let result = NamedPipeClient::new(
            pipe_name("missing"),
            PipeDirection::Duplex,
            PipeTransmission::Byte,
        );
        assert!(result.is_err());
    }
}
