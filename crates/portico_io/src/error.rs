// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use thiserror::Error;

/// Any I/O error that may arise from the Portico I/O engine, either while
/// setting up a transport, issuing an operation, or at operation completion.
///
/// The error taxonomy follows the engine's contract:
///
/// * *Setup errors* (handle creation, bind, listen, association) are returned
///   from the respective call and leave no partial state behind.
/// * *Issue errors* are carried inside [`Rejected`][1], together with the
///   untouched operation context, so the context can be reused immediately.
/// * *Completion errors* are stored in the context and observed through
///   [`take_error()`][2] inside the completion handler or after a synchronous
///   wait.
/// * A peer that disappears cleanly is **not** an error: the operation
///   completes successfully with zero bytes transferred.
///
/// # Thread safety
///
/// This type is thread-safe.
///
/// [1]: crate::Rejected
/// [2]: crate::SocketContext::take_error
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An API contract was violated, e.g. an operation was issued with an
    /// empty buffer where one is required.
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// The operation was canceled, either through an explicit `cancel()` call
    /// or because the owning handle was torn down while it was in flight.
    #[error("operation canceled")]
    Canceled,

    /// A synchronous wrapper timed out waiting for its operation, canceled it
    /// and drained the canceled completion.
    #[error("operation timed out")]
    TimedOut,

    /// The I/O primitive is closed or was never successfully created.
    #[error("I/O primitive is closed or invalid")]
    ClosedHandle,

    /// An asynchronous operation was issued on a handle that has not been
    /// associated with a reactor, so its completion could never be delivered.
    #[error("handle is not associated with a reactor")]
    NotAssociated,

    /// The handle is already associated with a reactor; a handle can deliver
    /// its completions to at most one reactor at a time.
    #[error("handle is already associated with a reactor")]
    AlreadyAssociated,

    /// The datagram payload exceeds what a single UDP datagram can carry.
    /// This is a hard send-time boundary, not a truncation.
    #[error("datagram of {size} bytes exceeds the maximum UDP payload of {limit} bytes")]
    DatagramTooLarge {
        /// Size of the rejected payload.
        size: usize,
        /// The platform payload ceiling (65,507 bytes).
        limit: usize,
    },

    /// A byte-range lock held by another handle denies this operation, or a
    /// fail-immediately lock request found the range already locked.
    #[error("byte-range lock conflict")]
    LockViolation,

    /// We are forwarding an error received from the operating system through
    /// the standard library's I/O error type.
    #[error(transparent)]
    StdIo(#[from] std::io::Error),
}

/// A specialized `Result` for use with engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents an engine error as a standard I/O error, for interoperation
/// with libraries that expect `std::io::Error`.
impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::StdIo(error) => error,
            other => Self::other(other),
        }
    }
}

impl Error {
    /// Whether this error is the cancellation marker stamped into a context
    /// when its operation was canceled rather than completed.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    pub(crate) fn unsupported(what: &str) -> Self {
        Self::StdIo(std::io::Error::new(std::io::ErrorKind::Unsupported, what.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;

    use static_assertions::assert_impl_all;

    use super::*;

    #[test]
    fn thread_safe_type() {
        assert_impl_all!(Error: Send, Sync);
    }

    #[test]
    fn into_stdio_error_preserves_kind() {
        let e = Error::StdIo(std::io::Error::new(ErrorKind::AlreadyExists, "oh no"));

        let io_error: std::io::Error = e.into();
        assert_eq!(io_error.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn into_stdio_error_wraps_engine_variants() {
        let e = Error::LockViolation;

        let io_error: std::io::Error = e.into();
        assert_eq!(io_error.kind(), ErrorKind::Other);
    }

    #[test]
    fn datagram_error_names_both_sizes() {
        let e = Error::DatagramTooLarge { size: 70_000, limit: 65_507 };

        let message = e.to_string();
        assert!(message.contains("70000"));
        assert!(message.contains("65507"));
    }
}
