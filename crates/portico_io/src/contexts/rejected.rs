// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::Error;

/// A rejected issue attempt: the error, together with the untouched operation
/// context.
///
/// When an `*_async` call cannot start an operation (closed handle, missing
/// buffer, handle not associated with a reactor, oversized datagram), nothing
/// has been handed to the operating system and no completion will ever be
/// delivered. The context is still *idle*; it comes back to the caller inside
/// this error so its buffer can be reclaimed or the call retried.
#[derive(Debug)]
pub struct Rejected<C> {
    error: Error,
    context: C,
}

impl<C> Rejected<C> {
    pub(crate) fn new(error: Error, context: C) -> Self {
        Self { error, context }
    }

    /// Why the issue attempt was rejected.
    #[must_use]
    pub fn error(&self) -> &Error {
        &self.error
    }

    /// Borrows the returned context.
    #[must_use]
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Recovers the context, discarding the error.
    #[must_use]
    pub fn into_context(self) -> C {
        self.context
    }

    /// Splits into the error and the context.
    #[must_use]
    pub fn into_parts(self) -> (Error, C) {
        (self.error, self.context)
    }
}

impl<C> std::fmt::Display for Rejected<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "operation rejected at issue: {}", self.error)
    }
}

impl<C: std::fmt::Debug> std::error::Error for Rejected<C> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Discards the returned context, keeping only the error. Convenient for
/// callers that propagate with `?` and do not intend to reuse the context.
impl<C> From<Rejected<C>> for Error {
    fn from(value: Rejected<C>) -> Self {
        value.error
    }
}

/// What an `*_async` issuer returns: `Ok(())` once the operation is pending
/// (or already queued for completion delivery), or the rejection carrying the
/// idle context back.
pub type IssueResult<C> = std::result::Result<(), Rejected<C>>;
