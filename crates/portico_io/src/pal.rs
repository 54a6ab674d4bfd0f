// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Platform adaptation layer.
//!
//! Everything that talks to the operating system directly lives below this
//! module, so that the engine proper (reactor, contexts, transports) contains
//! no `unsafe` code and no raw descriptor arithmetic. The wrappers translate
//! errno-style failures into [`std::io::Error`] and leave policy (retries,
//! completion routing, buffer accounting) to the callers.

pub(crate) mod file;
pub(crate) mod inotify;
pub(crate) mod poll;
pub(crate) mod socket;
pub(crate) mod wake;

pub(crate) use poll::Interest;
pub(crate) use wake::WakePipe;

use std::io;

/// Whether an I/O error means "the operation would block; park it and finish
/// it once the descriptor signals readiness".
pub(crate) fn is_would_block(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::WouldBlock
}

/// Whether an I/O error is the in-progress signal of a non-blocking
/// `connect()`. Such a connect is parked like a would-block operation and
/// finished once the descriptor becomes writable.
pub(crate) fn is_in_progress(error: &io::Error) -> bool {
    error.raw_os_error() == Some(libc::EINPROGRESS)
}

/// Whether an I/O error reports an interrupted call that should simply be
/// retried.
pub(crate) fn is_interrupted(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::Interrupted
}
