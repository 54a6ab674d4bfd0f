// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// The completion delegate: a single-method callback that receives the
/// finished operation context, buffer and all.
///
/// A context is handed to exactly one `*_async` call together with a handler;
/// when the operation completes, the engine moves the context back out and
/// invokes the handler with it. Ownership of the context (and therefore of
/// the I/O buffer inside it) returns to the consumer at that moment.
///
/// There is no base class to inherit from: any `FnMut(C)` closure is a
/// handler, so arbitrary object methods subscribe to completions by capturing
/// their receiver:
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use portico_io::{CompletionHandler, SocketContext};
///
/// struct EchoSession {
///     received: usize,
/// }
///
/// let session = Arc::new(Mutex::new(EchoSession { received: 0 }));
///
/// let handler = {
///     let session = Arc::clone(&session);
///     move |context: SocketContext| {
///         session.lock().unwrap().received += context.transferred();
///     }
/// };
///
/// fn assert_is_handler(_: impl CompletionHandler<SocketContext>) {}
/// assert_is_handler(handler);
/// ```
///
/// Operations issued without a handler are legal; their completion is then
/// observable only through the synchronous wrappers' private wait.
pub trait CompletionHandler<C>: Send {
    /// Receives the completed context. Inspect [`result()`-style accessors][1]
    /// on the context to learn the outcome and reclaim the buffer.
    ///
    /// Invoked on whichever thread delivers the completion: a thread inside
    /// [`Proactor::run()`][2] for reactor-routed operations.
    ///
    /// [1]: crate::SocketContext::result
    /// [2]: crate::Proactor::run
    fn on_event(&mut self, context: C);
}

impl<C, F> CompletionHandler<C> for F
where
    F: FnMut(C) + Send,
{
    fn on_event(&mut self, context: C) {
        self(context);
    }
}

/// The type-erased handler slot stored inside an operation context.
pub type BoxedCompletionHandler<C> = Box<dyn CompletionHandler<C> + 'static>;

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn closure_is_a_handler_and_sees_the_context() {
        let hits = Arc::new(AtomicUsize::new(0));

        let mut handler: BoxedCompletionHandler<u32> = Box::new({
            let hits = Arc::clone(&hits);
            move |context: u32| {
                hits.fetch_add(usize::try_from(context).unwrap(), Ordering::Relaxed);
            }
        });

        handler.on_event(2);
        handler.on_event(40);
        assert_eq!(hits.load(Ordering::Relaxed), 42);
    }

    #[test]
    fn handler_may_capture_an_object_method() {
        struct Counter {
            total: usize,
        }

        impl Counter {
            fn absorb(&mut self, context: usize) {
                self.total += context;
            }
        }

        let counter = Arc::new(std::sync::Mutex::new(Counter { total: 0 }));

        let mut handler: BoxedCompletionHandler<usize> = Box::new({
            let counter = Arc::clone(&counter);
            move |context| counter.lock().unwrap().absorb(context)
        });

        handler.on_event(7);
        assert_eq!(counter.lock().unwrap().total, 7);
    }
}
