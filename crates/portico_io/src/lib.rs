// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Portico I/O is a cross-transport completion-based I/O engine: a single
//! dispatcher (the [`Proactor`]) multiplexes completion notifications for
//! TCP/UDP sockets, named pipes, files and directory-change watches, and
//! every transport exposes the same dual contract:
//!
//! * `*_async(context)` — fire an operation and get notified later through
//!   the completion delegate carried by the context;
//! * the synchronous twin — issue the *identical* asynchronous operation
//!   bound to a private waitable and block on it, with cancellation when the
//!   wait times out.
//!
//! The major pieces, leaves first:
//!
//! 1. [Operation contexts][1] — one value per in-flight call, owning the I/O
//!    buffer for the duration of the operation together with the verb
//!    discriminant, the outcome (error + transferred count) and the
//!    completion delegate.
//! 1. The [completion delegate][2] — a single-method callback; any `FnMut`
//!    closure qualifies, so object methods subscribe by capturing their
//!    receiver.
//! 1. The [reactor][3] — routes kernel readiness to the owning transport and
//!    hands each queued completion to exactly one `run()` caller.
//! 1. The transports — [`Socket`], [`NamedPipeServer`]/[`NamedPipeClient`],
//!    [`FileStream`] and [`Directory`] — each owning one platform handle and
//!    pairing every verb's asynchronous issuer with its synchronous wrapper.
//! 1. The [background reactor][4] — a process-wide reactor plus dispatch
//!    thread for consumers that do not want to drive one themselves.
//!
//! Issuing an operation moves its context (buffer included) into the engine;
//! the context comes back only inside the delegate or out of the synchronous
//! wait, so a buffer can never be freed or moved while the operating system
//! may still write to it. Every transport counts its in-flight operations
//! and teardown drains that count before the handle is released.
//!
//! [1]: crate::SocketContext
//! [2]: crate::CompletionHandler
//! [3]: crate::Proactor
//! [4]: crate::BackgroundReactor

mod background;
mod bridge;
mod constants;
mod contexts;
mod directory;
mod endpoint;
mod error;
mod file_stream;
mod handler;
mod named_pipe;
mod pal;
mod pending;
mod portal;
mod proactor;
mod socket;

pub use background::*;
pub(crate) use constants::{DEFAULT_LISTEN_BACKLOG, ERR_POISONED_LOCK};
pub use constants::{MAX_CHANGE_BUFFER, MAX_UDP_PAYLOAD, MIN_CHANGE_BUFFER};
pub use contexts::*;
pub use directory::*;
pub use endpoint::*;
pub use error::*;
pub use file_stream::*;
pub use handler::*;
pub use named_pipe::*;
pub use proactor::Proactor;
pub use socket::*;
