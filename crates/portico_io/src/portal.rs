// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// The capability a handle-owning transport exposes to the reactor: "deliver
/// kernel readiness to me".
///
/// Association hands the reactor a weak reference to the transport's shared
/// state keyed by the registered descriptor; when the poller reports that
/// descriptor ready, the reactor calls [`on_ready()`][1] and the portal
/// finishes whatever parked operations the readiness unblocks, enqueues their
/// completions on the reactor, and re-arms its poller interest.
///
/// Every transport object implements this on its shared state; there is no
/// lookup table beyond the key-to-portal registry the reactor keeps.
///
/// [1]: Portal::on_ready
pub(crate) trait Portal: Send + Sync {
    /// Reacts to kernel readiness on one of the portal's descriptors.
    fn on_ready(&self);
}
