// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-operation context objects.
//!
//! A context represents exactly one in-flight or completed asynchronous call.
//! It owns the I/O buffer for the duration of the operation: issuing moves
//! the context (buffer and all) into the engine, and ownership returns to the
//! consumer inside the completion delegate or out of the synchronous wait.
//! There is consequently no way to free or move a buffer while its operation
//! is pending, and no way to re-issue a context that has not completed.

mod dir_context;
mod file_context;
mod pipe_context;
mod rejected;
mod socket_context;

pub use dir_context::*;
pub use file_context::*;
pub use pipe_context::*;
pub use rejected::*;
pub use socket_context::*;
