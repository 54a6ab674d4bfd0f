// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use bytes::BytesMut;

use crate::pending::OpContext;
use crate::{BoxedCompletionHandler, CompletionHandler, Error};

/// The verb that issued a directory context. The directory transport has
/// exactly one: arming a change watch and reading its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirOp {
    /// Waiting for change records and reading them into the buffer.
    ReadChanges,
}

bitflags::bitflags! {
    /// Which kinds of changes a directory watch reports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NotifyFilter: u32 {
        /// A file was created, deleted or renamed.
        const FILE_NAME = 0x0001;
        /// A subdirectory was created, deleted or renamed.
        const DIR_NAME = 0x0002;
        /// Attributes of an entry changed.
        const ATTRIBUTES = 0x0004;
        /// The size of a file changed.
        const SIZE = 0x0008;
        /// The contents of a file were written.
        const LAST_WRITE = 0x0010;
        /// A file was read.
        const LAST_ACCESS = 0x0020;
        /// An entry was created.
        const CREATION = 0x0040;
        /// The security metadata of an entry changed.
        const SECURITY = 0x0100;
    }
}

impl Default for NotifyFilter {
    fn default() -> Self {
        Self::FILE_NAME | Self::DIR_NAME | Self::LAST_WRITE
    }
}

/// The per-operation context of the directory-watch transport.
///
/// The buffer receives raw, platform-shaped change records; this layer
/// treats them as opaque bytes and record parsing is a collaborator's
/// concern. The buffer capacity must lie within
/// [`MIN_CHANGE_BUFFER`][1]`..=`[`MAX_CHANGE_BUFFER`][2].
///
/// [1]: crate::MIN_CHANGE_BUFFER
/// [2]: crate::MAX_CHANGE_BUFFER
#[derive(derive_more::Debug, Default)]
pub struct DirContext {
    token: u64,
    op: Option<DirOp>,
    #[debug(skip)]
    buffer: BytesMut,
    error: Option<Error>,
    transferred: usize,
    #[debug(skip)]
    handler: Option<BoxedCompletionHandler<Self>>,
    filter: Option<NotifyFilter>,
    watch_subtree: bool,
}

impl DirContext {
    /// Creates an idle context with no buffer and no delegate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an idle context carrying the given change-record buffer.
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

    /// The change-record buffer.
    #[must_use]
    pub fn buffer(&self) -> &BytesMut {
        &self.buffer
    }

    /// Replaces the change-record buffer, returning the previous one.
    pub fn set_buffer(&mut self, buffer: BytesMut) -> BytesMut {
        std::mem::replace(&mut self.buffer, buffer)
    }

    /// Reclaims the change-record buffer.
    #[must_use]
    pub fn take_buffer(&mut self) -> BytesMut {
        std::mem::take(&mut self.buffer)
    }

    /// Sets the completion delegate invoked when change records arrive.
    pub fn set_handler(&mut self, handler: impl CompletionHandler<Self> + 'static) {
        self.handler = Some(Box::new(handler));
    }

    /// The verb that issued this context.
    #[must_use]
    pub fn last_op(&self) -> Option<DirOp> {
        self.op
    }

    /// The number of change-record bytes delivered into the buffer.
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

    /// The change kinds the watch is armed for; defaults to name and
    /// last-write changes when unset.
    #[must_use]
    pub fn filter(&self) -> NotifyFilter {
        self.filter.unwrap_or_default()
    }

    /// Sets the change kinds the watch is armed for.
    pub fn set_filter(&mut self, filter: NotifyFilter) {
        self.filter = Some(filter);
    }

    /// Whether the watch covers the whole subtree under the directory.
    #[must_use]
    pub fn watch_subtree(&self) -> bool {
        self.watch_subtree
    }

    /// Arms the watch for the whole subtree instead of the directory alone.
    pub fn set_watch_subtree(&mut self, watch_subtree: bool) {
        self.watch_subtree = watch_subtree;
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    pub(crate) fn stamp(&mut self, op: DirOp) {
        self.op = Some(op);
        self.error = None;
        self.transferred = 0;
    }
}

impl OpContext for DirContext {
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
        assert_impl_all!(DirContext: Send);
    }

    #[test]
    fn default_filter_covers_names_and_writes() {
        let context = DirContext::new();
        assert!(context.filter().contains(NotifyFilter::FILE_NAME));
        assert!(context.filter().contains(NotifyFilter::LAST_WRITE));
        assert!(!context.filter().contains(NotifyFilter::SECURITY));
    }

    #[test]
    fn subtree_flag_round_trips() {
        let mut context = DirContext::new();
        assert!(!context.watch_subtree());

        context.set_watch_subtree(true);
        assert!(context.watch_subtree());
    }
}
