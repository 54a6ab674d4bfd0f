// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The synchronous-over-asynchronous bridge.
//!
//! Every blocking verb is implemented by issuing the identical asynchronous
//! operation with *private routing*: the completion goes into a bounded
//! channel (the private waitable) instead of the shared reactor, and the
//! calling thread drives the operation itself — alternating between finish
//! attempts and a readiness wait on the transport's descriptor plus its wake
//! pipe — until the channel signals, the timeout elapses, or another thread
//! cancels the handle.
//!
//! On timeout the bridge cancels the handle and performs one final blocking
//! fetch. Cancellation may race with completion; the fetch tolerates both
//! outcomes and reports which one happened so the wrapper can distinguish a
//! genuine timeout from a result that arrived in the race window.

use std::os::fd::RawFd;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::{Duration, Instant};

use crate::pal::{Interest, WakePipe};
use crate::pending::OpContext;
use crate::{Error, Result};

/// Upper bound on the final fetch after cancellation. Cancellation delivers
/// synchronously, so this only guards against an engine defect turning into
/// an infinite hang.
const FINAL_FETCH_GRACE: Duration = Duration::from_secs(5);

/// How a private wait concluded.
#[derive(Debug)]
pub(crate) struct SyncOutcome<C> {
    /// The completed (possibly canceled) context.
    pub(crate) context: C,
    /// Whether the wait ran out and the result was obtained through
    /// cancel-plus-final-fetch.
    pub(crate) timed_out: bool,
}

/// Drives one privately routed operation to completion.
///
/// `drive` runs the transport's non-blocking finish attempts over its private
/// parked operations; `cancel` is the transport's cancel-everything call,
/// invoked exactly once if the timeout elapses.
pub(crate) fn block_on<C: OpContext>(
    completions: &Receiver<C>,
    timeout: Option<Duration>,
    fd: Option<(RawFd, Interest)>,
    wake: &WakePipe,
    mut drive: impl FnMut(),
    cancel: impl FnOnce(),
) -> Result<SyncOutcome<C>> {
    let deadline = timeout.map(|t| Instant::now() + t);

    loop {
        drive();

        match completions.try_recv() {
            Ok(context) => {
                return Ok(SyncOutcome {
                    context,
                    timed_out: false,
                });
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                return Err(Error::ContractViolation(
                    "private completion channel lost its operation".to_string(),
                ));
            }
        }

        let remaining = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    // Cancel everything outstanding on the handle, then fetch
                    // the result of this operation: either the cancellation
                    // marker or, if completion won the race, the real result.
                    cancel();
                    drive();
                    let context = completions
                        .recv_timeout(FINAL_FETCH_GRACE)
                        .map_err(|_: RecvTimeoutError| {
                            Error::ContractViolation(
                                "canceled operation was never delivered".to_string(),
                            )
                        })?;
                    return Ok(SyncOutcome {
                        context,
                        timed_out: true,
                    });
                }
                Some(deadline - now)
            }
            None => None,
        };

        crate::pal::poll::wait(fd, wake.wait_fd(), remaining).map_err(Error::StdIo)?;
        wake.drain();
    }
}

/// Folds a private wait's outcome into the synchronous wrapper's result,
/// converting a cancellation that *we* induced by timing out into
/// [`Error::TimedOut`]. A cancellation induced by another thread stays
/// [`Error::Canceled`].
pub(crate) fn fold_outcome<C: OpContext>(
    outcome: &mut SyncOutcome<C>,
    take_error: impl FnOnce(&mut C) -> Option<Error>,
) -> Result<()> {
    match take_error(&mut outcome.context) {
        None => Ok(()),
        Some(Error::Canceled) if outcome.timed_out => Err(Error::TimedOut),
        Some(error) => Err(error),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::sync_channel;

    use super::*;
    use crate::pending::OpContext;

    #[derive(Debug)]
    struct TestContext {
        error: Option<Error>,
    }

    impl OpContext for TestContext {
        fn finalize(&mut self, error: Option<Error>, _transferred: usize) {
            self.error = error;
        }

        fn take_handler(&mut self) -> Option<crate::BoxedCompletionHandler<Self>> {
            None
        }
    }

    #[test]
    fn immediate_completion_is_picked_up_without_waiting() {
        let (tx, rx) = sync_channel(1);
        tx.send(TestContext { error: None }).unwrap();

        let wake = WakePipe::new().unwrap();
        let outcome = block_on(
            &rx,
            Some(Duration::from_secs(5)),
            None,
            &wake,
            || {},
            || panic!("must not cancel"),
        )
        .unwrap();

        assert!(!outcome.timed_out);
    }

    #[test]
    fn timeout_runs_cancel_and_fetches_the_canceled_result() {
        let (tx, rx) = sync_channel::<TestContext>(1);
        let wake = WakePipe::new().unwrap();

        let started = Instant::now();
        let mut outcome = block_on(
            &rx,
            Some(Duration::from_millis(50)),
            None,
            &wake,
            || {},
            move || {
                // Plays the transport's cancel: deliver the operation with
                // the cancellation marker stamped.
                let mut context = TestContext { error: None };
                context.finalize(Some(Error::Canceled), 0);
                tx.send(context).unwrap();
            },
        )
        .unwrap();

        assert!(outcome.timed_out);
        assert!(started.elapsed() >= Duration::from_millis(45));

        let folded = fold_outcome(&mut outcome, |context| context.error.take());
        assert!(matches!(folded, Err(Error::TimedOut)));
    }

    #[test]
    fn completion_winning_the_cancel_race_is_surfaced_as_success() {
        let (tx, rx) = sync_channel::<TestContext>(1);
        let wake = WakePipe::new().unwrap();

        let mut outcome = block_on(
            &rx,
            Some(Duration::from_millis(20)),
            None,
            &wake,
            || {},
            move || {
                // The operation actually completed in the race window.
                tx.send(TestContext { error: None }).unwrap();
            },
        )
        .unwrap();

        assert!(outcome.timed_out);
        let folded = fold_outcome(&mut outcome, |context| context.error.take());
        assert!(folded.is_ok());
    }
}
