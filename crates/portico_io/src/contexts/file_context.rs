// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use bytes::BytesMut;

use crate::pending::OpContext;
use crate::{BoxedCompletionHandler, CompletionHandler, Error};

/// The verb that issued a file context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    /// Reading one chunk at an offset.
    Read,
    /// Writing one chunk at an offset.
    Write,
    /// Taking a byte-range lock.
    Lock,
    /// Releasing a byte-range lock.
    Unlock,
}

bitflags::bitflags! {
    /// How a byte-range lock is taken.
    ///
    /// The default is the strictest form: exclusive, failing immediately if
    /// any part of the range is already locked by another handle. Clearing
    /// `EXCLUSIVE` requests a shared (reader) lock; clearing
    /// `FAIL_IMMEDIATELY` makes the synchronous wrapper wait for the range
    /// instead of failing (asynchronous lock issues always fail immediately).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LockMode: u32 {
        /// No other handle may hold any lock overlapping the range.
        const EXCLUSIVE = 0b01;
        /// A contended range fails the operation instead of waiting.
        const FAIL_IMMEDIATELY = 0b10;
    }
}

impl Default for LockMode {
    fn default() -> Self {
        Self::EXCLUSIVE | Self::FAIL_IMMEDIATELY
    }
}

/// A byte range of a file, for lock and unlock operations. Ranges beyond the
/// current end of the file are legal to lock and do not extend the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRange {
    /// First byte of the range.
    pub offset: u64,
    /// Length of the range in bytes.
    pub length: u64,
}

impl LockRange {
    /// Creates a range covering `length` bytes starting at `offset`.
    #[must_use]
    pub const fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }
}

/// The per-operation context of the file-stream transport.
///
/// Read and write verbs use the buffer plus an optional explicit offset; with
/// no offset set, the operation runs at the stream's current position and the
/// stream advances its position by the transferred count afterwards. Lock and
/// unlock verbs use the [`LockRange`] and [`LockMode`] fields instead of the
/// buffer.
#[derive(derive_more::Debug, Default)]
pub struct FileContext {
    token: u64,
    op: Option<FileOp>,
    #[debug(skip)]
    buffer: BytesMut,
    error: Option<Error>,
    transferred: usize,
    #[debug(skip)]
    handler: Option<BoxedCompletionHandler<Self>>,
    offset: Option<u64>,
    lock_range: Option<LockRange>,
    lock_mode: Option<LockMode>,
}

impl FileContext {
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
    pub fn last_op(&self) -> Option<FileOp> {
        self.op
    }

    /// The number of bytes transferred, populated once at completion. A read
    /// at or past the end of the file completes with zero; success, not an
    /// error.
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

    /// The explicit file offset of a read or write; `None` means the
    /// stream's current position.
    #[must_use]
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// Sets an explicit 64-bit file offset for a read or write.
    pub fn set_offset(&mut self, offset: u64) {
        self.offset = Some(offset);
    }

    /// The byte range of a lock or unlock operation.
    #[must_use]
    pub fn lock_range(&self) -> Option<LockRange> {
        self.lock_range
    }

    /// Sets the byte range for a lock or unlock operation.
    pub fn set_lock_range(&mut self, range: LockRange) {
        self.lock_range = Some(range);
    }

    /// The lock mode; defaults to exclusive and fail-immediately when unset.
    #[must_use]
    pub fn lock_mode(&self) -> LockMode {
        self.lock_mode.unwrap_or_default()
    }

    /// Overrides the lock mode for a lock operation.
    pub fn set_lock_mode(&mut self, mode: LockMode) {
        self.lock_mode = Some(mode);
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    pub(crate) fn stamp(&mut self, op: FileOp) {
        self.op = Some(op);
        self.error = None;
        self.transferred = 0;
    }
}

impl OpContext for FileContext {
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
        assert_impl_all!(FileContext: Send);
    }

    #[test]
    fn default_lock_mode_is_exclusive_and_immediate() {
        let context = FileContext::new();
        assert_eq!(context.lock_mode(), LockMode::EXCLUSIVE | LockMode::FAIL_IMMEDIATELY);
    }

    #[test]
    fn offset_is_optional() {
        let mut context = FileContext::new();
        assert_eq!(context.offset(), None);

        context.set_offset(1 << 40);
        assert_eq!(context.offset(), Some(1 << 40));
    }

    #[test]
    fn lock_fields_round_trip() {
        let mut context = FileContext::new();
        context.set_lock_range(LockRange::new(100, 50));
        context.set_lock_mode(LockMode::EXCLUSIVE);

        assert_eq!(context.lock_range(), Some(LockRange::new(100, 50)));
        assert!(!context.lock_mode().contains(LockMode::FAIL_IMMEDIATELY));
    }
}
