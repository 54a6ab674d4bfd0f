// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{Level, event};

use crate::{ERR_POISONED_LOCK, Proactor};

/// How long one background dispatch waits before re-checking the stop flag.
const DISPATCH_TICK: Duration = Duration::from_millis(100);

/// A reactor with a dedicated thread draining its completions, for consumers
/// that do not want to own a reactor thread themselves.
///
/// Transports associate with [`proactor()`][1] exactly as they would with a
/// privately owned reactor; their completion delegates then run on the
/// background thread.
///
/// A process-wide instance is available through [`shared()`][2], lazily
/// started on first use and stopped with [`shutdown_shared()`][3]. Privately
/// owned instances stop when dropped or on [`shutdown()`][4]; both stop paths
/// are idempotent.
///
/// # Thread safety
///
/// This type is thread-safe.
///
/// [1]: Self::proactor
/// [2]: Self::shared
/// [3]: Self::shutdown_shared
/// [4]: Self::shutdown
#[derive(Debug)]
pub struct BackgroundReactor {
    proactor: Proactor,
    stop: Arc<AtomicBool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundReactor {
    /// Creates the reactor and starts its dispatch thread.
    pub fn new() -> crate::Result<Self> {
        let proactor = Proactor::new()?;
        let stop = Arc::new(AtomicBool::new(false));

        let dispatcher = thread::Builder::new()
            .name("portico-io-dispatch".to_string())
            .spawn({
                let proactor = proactor.clone();
                let stop = Arc::clone(&stop);
                move || {
                    while !stop.load(Ordering::Acquire) {
                        let _ = proactor.run(Some(DISPATCH_TICK));
                    }
                    event!(Level::DEBUG, message = "background dispatch stopped");
                }
            })
            .map_err(crate::Error::StdIo)?;

        Ok(Self {
            proactor,
            stop,
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    /// The reactor driven by the background thread. Associate transports with
    /// it to have their completion delegates run there.
    #[must_use]
    pub fn proactor(&self) -> &Proactor {
        &self.proactor
    }

    /// Stops the dispatch thread and waits for it to exit. Idempotent; the
    /// reactor itself stays usable for manual `run()` calls afterwards.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Release);
        self.proactor.shared().notify();

        let dispatcher = self.dispatcher.lock().expect(ERR_POISONED_LOCK).take();
        if let Some(dispatcher) = dispatcher {
            let _ = dispatcher.join();
        }
    }

    /// The process-wide shared instance, started on first use.
    pub fn shared() -> crate::Result<Arc<Self>> {
        let mut slot = shared_slot().lock().expect(ERR_POISONED_LOCK);
        if let Some(existing) = slot.as_ref() {
            return Ok(Arc::clone(existing));
        }

        let fresh = Arc::new(Self::new()?);
        *slot = Some(Arc::clone(&fresh));
        Ok(fresh)
    }

    /// Stops the process-wide shared instance, if it was ever started.
    /// Idempotent; a later [`shared()`][Self::shared] call starts a fresh one.
    pub fn shutdown_shared() {
        let taken = shared_slot().lock().expect(ERR_POISONED_LOCK).take();
        if let Some(reactor) = taken {
            reactor.shutdown();
        }
    }
}

impl Drop for BackgroundReactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn shared_slot() -> &'static Mutex<Option<Arc<BackgroundReactor>>> {
    static SHARED: OnceLock<Mutex<Option<Arc<BackgroundReactor>>>> = OnceLock::new();
    SHARED.get_or_init(|| Mutex::new(None))
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    #[test]
    fn thread_safe_type() {
        assert_impl_all!(BackgroundReactor: Send, Sync);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let reactor = BackgroundReactor::new().unwrap();
        reactor.shutdown();
        reactor.shutdown();
    }

    #[test]
    fn shared_instance_is_reused_until_shut_down() {
        let first = BackgroundReactor::shared().unwrap();
        let second = BackgroundReactor::shared().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        BackgroundReactor::shutdown_shared();
        BackgroundReactor::shutdown_shared();
    }
}
