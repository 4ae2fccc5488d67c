//! Boolean signal with blocking wait and change notification.
//!
//! [`Signal`] is the only state shared across monitor tasks: a flag that one
//! producer sets or clears and any number of consumers await. Registered
//! observers are invoked synchronously on every `set`/`clear` call, even
//! when the value did not change, so a [`crate::CompositeWaiter`] can
//! recompute its derived value eagerly.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

/// Observer callback invoked after every `set`/`clear`.
type Observer = Arc<dyn Fn() + Send + Sync>;

struct Shared {
    /// Current value plus wakeup channel. `watch` is level-triggered:
    /// a waiter checks the current value before parking, so a transition
    /// that happened before the wait began is never missed.
    state: watch::Sender<bool>,
    observers: Mutex<Vec<Observer>>,
}

/// A boolean flag with blocking wait, cloneable across tasks.
///
/// Clones share state. Waits resolve as soon as the value is observed set;
/// `set` and `clear` may alternate freely.
#[derive(Clone)]
pub struct Signal {
    shared: Arc<Shared>,
}

impl Signal {
    /// Creates a new signal in the cleared state.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                state,
                observers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Sets the flag and notifies waiters and observers.
    pub fn set(&self) {
        self.store(true);
    }

    /// Clears the flag and notifies waiters and observers.
    pub fn clear(&self) {
        self.store(false);
    }

    fn store(&self, value: bool) {
        self.shared.state.send_replace(value);
        // Snapshot under the lock, invoke outside it: an observer may set or
        // clear another signal (or this one) without deadlocking.
        let observers: Vec<Observer> = self.shared.observers.lock().clone();
        for observer in observers {
            observer();
        }
    }

    /// Returns the current value.
    #[must_use]
    pub fn is_set(&self) -> bool {
        *self.shared.state.borrow()
    }

    /// Waits until the flag is set or the timeout elapses.
    ///
    /// Returns whether the flag was observed set.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let mut rx = self.shared.state.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(|set| *set)).await {
            Ok(Ok(_)) => true,
            // The sender lives inside `self`, so a closed channel cannot
            // happen while this signal is alive.
            Ok(Err(_)) | Err(_) => false,
        }
    }

    /// Waits until the flag is set, with no bound.
    pub async fn wait_set(&self) {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|set| *set).await;
    }

    /// Registers an observer invoked synchronously on every `set`/`clear`,
    /// including redundant ones. Observers must not block.
    pub fn observe(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.shared.observers.lock().push(Arc::new(callback));
    }

    /// Returns a weak handle that does not extend this signal's lifetime.
    #[must_use]
    pub fn downgrade(&self) -> WeakSignal {
        WeakSignal {
            shared: Arc::downgrade(&self.shared),
        }
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal").field("set", &self.is_set()).finish()
    }
}

/// Weak counterpart of [`Signal`], used by observers so that observation
/// never keeps a signal alive.
#[derive(Clone)]
pub struct WeakSignal {
    shared: Weak<Shared>,
}

impl WeakSignal {
    /// Upgrades to a strong handle if the signal is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Signal> {
        self.shared.upgrade().map(|shared| Signal { shared })
    }
}

impl fmt::Debug for WeakSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakSignal")
            .field("alive", &(self.shared.strong_count() > 0))
            .finish()
    }
}
