//! Observer delivery
//!
//! Each session runs one callback context: a task that executes queued
//! callbacks one at a time, in the order they were posted. Callbacks of a
//! session therefore never overlap.
//!
//! A [`DeliveryGate`] per subscription makes `close()` a barrier. The context
//! holds the gate while calling into the observer, the decode pipeline holds
//! it while handing out media, and `close()` flips the closed flag under the
//! same gate. The gate is reentrant, so an observer may
//! close its subscription from inside a callback.

use std::cell::Cell;
use std::panic::AssertUnwindSafe;

use parking_lot::ReentrantMutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::transport::SessionId;

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Serial executor for observer callbacks
#[derive(Debug, Clone)]
pub(crate) struct CallbackContext {
    tx: mpsc::UnboundedSender<Callback>,
}

impl CallbackContext {
    pub fn spawn(runtime: &Handle, session: SessionId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Callback>();

        runtime.spawn(async move {
            while let Some(callback) = rx.recv().await {
                if std::panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
                    tracing::error!(session = %session, "Observer callback panicked");
                }
            }
            tracing::trace!(session = %session, "Callback context stopped");
        });

        Self { tx }
    }

    /// Queue a callback; false if the context has stopped
    pub fn post(&self, callback: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(Box::new(callback)).is_ok()
    }
}

/// Barrier between observer delivery and close
#[derive(Debug)]
pub(crate) struct DeliveryGate {
    closed: ReentrantMutex<Cell<bool>>,
}

impl DeliveryGate {
    pub fn new() -> Self {
        Self {
            closed: ReentrantMutex::new(Cell::new(false)),
        }
    }

    /// Run `deliver` while holding the gate, unless closed
    ///
    /// Used for observer callbacks and for media handed to the render
    /// target or audio sink.
    pub fn deliver<R>(&self, deliver: impl FnOnce() -> R) -> Option<R> {
        let closed = self.closed.lock();
        if closed.get() {
            return None;
        }
        Some(deliver())
    }

    /// Close the gate
    ///
    /// Waits for a delivery in progress on another thread. Returns false if
    /// the gate was already closed.
    pub fn close(&self) -> bool {
        let closed = self.closed.lock();
        !closed.replace(true)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.lock().get()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_gate_blocks_after_close() {
        let gate = DeliveryGate::new();
        let mut calls = 0;

        assert!(gate.deliver(|| calls += 1).is_some());
        assert!(gate.close());
        assert!(!gate.close());
        assert!(gate.deliver(|| calls += 1).is_none());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_close_from_inside_delivery() {
        let gate = DeliveryGate::new();
        let mut closed_inside = false;

        gate.deliver(|| closed_inside = gate.close());

        assert!(closed_inside);
        assert!(gate.is_closed());
    }

    #[test]
    fn test_close_waits_for_delivery() {
        let gate = Arc::new(DeliveryGate::new());
        let progress = Arc::new(AtomicUsize::new(0));

        let worker = {
            let gate = Arc::clone(&gate);
            let progress = Arc::clone(&progress);
            std::thread::spawn(move || {
                gate.deliver(|| {
                    progress.store(1, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(50));
                    progress.store(2, Ordering::SeqCst);
                });
            })
        };

        while progress.load(Ordering::SeqCst) == 0 {
            std::thread::yield_now();
        }
        gate.close();
        assert_eq!(progress.load(Ordering::SeqCst), 2);
        worker.join().unwrap();
    }

    #[tokio::test]
    async fn test_context_runs_in_order_and_survives_panics() {
        let context = CallbackContext::spawn(&Handle::current(), SessionId::for_test(1));
        let (tx, mut rx) = mpsc::unbounded_channel();

        for n in 0..3 {
            let tx = tx.clone();
            context.post(move || {
                if n == 1 {
                    panic!("observer bug");
                }
                tx.send(n).unwrap();
            });
        }

        assert_eq!(rx.recv().await, Some(0));
        assert_eq!(rx.recv().await, Some(2));
    }
}
