// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use bytes::BytesMut;

use crate::pending::OpContext;
use crate::{BoxedCompletionHandler, CompletionHandler, Error, IpEndpoint, Socket};

/// The verb that issued a socket context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketOp {
    /// Accepting an inbound connection into a pre-created socket.
    Accept,
    /// Establishing an outbound connection.
    Connect,
    /// Gracefully tearing down the connection, optionally renewing the
    /// socket for reuse.
    Disconnect,
    /// Sending one chunk on a connected stream.
    Send,
    /// Receiving one chunk from a connected stream.
    Receive,
    /// Sending one datagram to an explicit endpoint.
    SendTo,
    /// Receiving one datagram, capturing its source endpoint.
    ReceiveFrom,
}

/// The per-operation context of the socket transport.
///
/// Exactly one asynchronous call owns a context at a time. The caller fills
/// in what the verb needs — a buffer for send/receive, a remote endpoint for
/// connect and send-to, a pre-created unconnected socket for accept — sets
/// the completion delegate, and hands the context to the `*_async` issuer.
/// On completion the delegate receives the context back with
/// [`transferred()`][1] and [`take_error()`][2] populated and the buffer
/// available for reclaim through [`take_buffer()`][3].
///
/// Send operations transmit `buffer[..len]`; receive operations append into
/// the buffer's spare capacity, so a receive context is typically built over
/// `BytesMut::with_capacity(n)`. One completion reports at most one partial
/// chunk; callers needing an exact total re-slice and re-issue, looping on
/// the transferred count.
///
/// [1]: Self::transferred
/// [2]: Self::take_error
/// [3]: Self::take_buffer
#[derive(derive_more::Debug, Default)]
pub struct SocketContext {
    token: u64,
    op: Option<SocketOp>,
    #[debug(skip)]
    buffer: BytesMut,
    error: Option<Error>,
    transferred: usize,
    #[debug(skip)]
    handler: Option<BoxedCompletionHandler<Self>>,
    remote_endpoint: Option<IpEndpoint>,
    accept_socket: Option<Socket>,
    reuse: bool,
}

impl SocketContext {
    /// Creates an idle context with no buffer and no delegate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an idle context carrying the given I/O buffer.
    #[must_use]
    pub fn with_buffer(buffer: BytesMut) -> Self {
        Self {
            buffer,
            ..Self::default()
        }
    }

    /// An arbitrary caller value carried through the operation untouched.
    #[must_use]
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Sets the caller token. The engine never interprets it.
    pub fn set_token(&mut self, token: u64) {
        self.token = token;
    }

    /// The I/O buffer. Send verbs transmit its initialized bytes; receive
    /// verbs append into its spare capacity.
    #[must_use]
    pub fn buffer(&self) -> &BytesMut {
        &self.buffer
    }

    /// Replaces the I/O buffer, returning the previous one.
    pub fn set_buffer(&mut self, buffer: BytesMut) -> BytesMut {
        std::mem::replace(&mut self.buffer, buffer)
    }

    /// Reclaims the I/O buffer, leaving the context without one.
    #[must_use]
    pub fn take_buffer(&mut self) -> BytesMut {
        std::mem::take(&mut self.buffer)
    }

    /// Sets the completion delegate invoked when the operation finishes.
    /// Without one, the completion is observable only through a synchronous
    /// wrapper's private wait.
    pub fn set_handler(&mut self, handler: impl CompletionHandler<Self> + 'static) {
        self.handler = Some(Box::new(handler));
    }

    /// The verb that issued this context, stamped at issue time.
    #[must_use]
    pub fn last_op(&self) -> Option<SocketOp> {
        self.op
    }

    /// The number of bytes transferred, populated once at completion. Zero on
    /// a completed receive means the peer closed cleanly; this is success,
    /// not an error.
    #[must_use]
    pub fn transferred(&self) -> usize {
        self.transferred
    }

    /// Takes the completion error, if the operation failed.
    #[must_use]
    pub fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }

    /// Folds the completion outcome into a result: the transferred byte
    /// count, or the completion error (which this call consumes).
    pub fn result(&mut self) -> crate::Result<usize> {
        match self.error.take() {
            Some(error) => Err(error),
            None => Ok(self.transferred),
        }
    }

    /// The remote endpoint: the send-to destination (caller-set), or the
    /// datagram source / accepted peer (engine-set at completion).
    #[must_use]
    pub fn remote_endpoint(&self) -> Option<IpEndpoint> {
        self.remote_endpoint
    }

    /// Sets the remote endpoint for connect and send-to verbs.
    pub fn set_remote_endpoint(&mut self, endpoint: IpEndpoint) {
        self.remote_endpoint = Some(endpoint);
    }

    /// Supplies the pre-created, not-yet-connected socket an accept operation
    /// will turn into the server side of the accepted connection.
    pub fn set_accept_socket(&mut self, socket: Socket) {
        self.accept_socket = Some(socket);
    }

    /// Borrows the accept socket, if one is set.
    #[must_use]
    pub fn accept_socket(&self) -> Option<&Socket> {
        self.accept_socket.as_ref()
    }

    /// Reclaims the accept socket; after a successful accept completion it
    /// carries the established connection.
    #[must_use]
    pub fn take_accept_socket(&mut self) -> Option<Socket> {
        self.accept_socket.take()
    }

    /// Whether a disconnect should renew the socket for another connect,
    /// rather than leave it unusable.
    #[must_use]
    pub fn reuse(&self) -> bool {
        self.reuse
    }

    /// Sets the disconnect-for-reuse flag.
    pub fn set_reuse(&mut self, reuse: bool) {
        self.reuse = reuse;
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    pub(crate) fn stamp(&mut self, op: SocketOp) {
        self.op = Some(op);
        self.error = None;
        self.transferred = 0;
    }

    pub(crate) fn set_completed_endpoint(&mut self, endpoint: IpEndpoint) {
        self.remote_endpoint = Some(endpoint);
    }
}

impl OpContext for SocketContext {
    fn finalize(&mut self, error: Option<Error>, transferred: usize) {
        self.error = error;
        self.transferred = transferred;
    }

    fn take_handler(&mut self) -> Option<BoxedCompletionHandler<Self>> {
        self.handler.take()
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    #[test]
    fn thread_safe_type() {
        assert_impl_all!(SocketContext: Send);
    }

    #[test]
    fn buffer_round_trips_through_the_context() {
        let mut context = SocketContext::with_buffer(BytesMut::from(&b"payload"[..]));
        assert_eq!(context.buffer().len(), 7);

        let buffer = context.take_buffer();
        assert_eq!(&buffer[..], b"payload");
        assert_eq!(context.buffer().len(), 0);
    }

    #[test]
    fn completion_outcome_is_foldable() {
        let mut context = SocketContext::new();
        context.stamp(SocketOp::Receive);
        context.finalize(None, 128);

        assert_eq!(context.last_op(), Some(SocketOp::Receive));
        assert_eq!(context.result().unwrap(), 128);
    }

    #[test]
    fn completion_error_is_consumed_once() {
        let mut context = SocketContext::new();
        context.stamp(SocketOp::Send);
        context.finalize(Some(Error::Canceled), 0);

        assert!(context.result().is_err());
        assert!(context.result().is_ok());
    }

    #[test]
    fn stamp_resets_prior_outcome() {
        let mut context = SocketContext::new();
        context.stamp(SocketOp::Send);
        context.finalize(Some(Error::Canceled), 3);

        context.stamp(SocketOp::Receive);
        assert_eq!(context.transferred(), 0);
        assert!(context.result().is_ok());
    }
}
