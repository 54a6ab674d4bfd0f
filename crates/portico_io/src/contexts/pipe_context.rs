// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use bytes::BytesMut;

use crate::pending::OpContext;
use crate::{BoxedCompletionHandler, CompletionHandler, Error};

/// The verb that issued a pipe context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeOp {
    /// Waiting for a client to connect to the pipe.
    Accept,
    /// Reading one chunk (byte mode) or at most one message (message mode).
    Read,
    /// Writing one chunk or one message.
    Write,
}

/// The per-operation context of the named-pipe transport.
///
/// Works like [`SocketContext`][1]: the caller supplies the buffer and the
/// completion delegate, the issuer stamps the verb, and the completed context
/// comes back through the delegate or the synchronous wait. In message mode a
/// completed read never spans two messages, no matter how large the buffer.
///
/// [1]: crate::SocketContext
#[derive(derive_more::Debug, Default)]
pub struct PipeContext {
    token: u64,
    op: Option<PipeOp>,
    #[debug(skip)]
    buffer: BytesMut,
    error: Option<Error>,
    transferred: usize,
    #[debug(skip)]
    handler: Option<BoxedCompletionHandler<Self>>,
}

impl PipeContext {
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

    /// The I/O buffer. Writes transmit its initialized bytes; reads append
    /// into its spare capacity.
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
    pub fn set_handler(&mut self, handler: impl CompletionHandler<Self> + 'static) {
        self.handler = Some(Box::new(handler));
    }

    /// The verb that issued this context, stamped at issue time.
    #[must_use]
    pub fn last_op(&self) -> Option<PipeOp> {
        self.op
    }

    /// The number of bytes transferred, populated once at completion. Zero on
    /// a completed read means the peer closed its end; success, not an error.
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

    pub(crate) fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    pub(crate) fn stamp(&mut self, op: PipeOp) {
        self.op = Some(op);
        self.error = None;
        self.transferred = 0;
    }
}

impl OpContext for PipeContext {
    fn finalize(&mut self, error: Option<Error>, transferred: usize) {
        self.error = error;
        self.transferred = transferred;
    }

    fn take_handler(&mut self) -> Option<BoxedCompletionHandler<Self>> {
        self.handler.take()
    }
}
