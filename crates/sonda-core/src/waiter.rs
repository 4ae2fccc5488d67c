//! Composite wait over a set of signals.
//!
//! A [`CompositeWaiter`] derives a single [`Signal`] that is set iff at
//! least one of its constituents is set, letting the orchestrator block on
//! "data found OR failed" with one wait call. The derived value is
//! recomputed from the constituents' current states, never from queued
//! notifications, so there are no missed wakeups.

use std::time::Duration;

use crate::signal::{Signal, WeakSignal};

/// A derived signal that is the logical OR of its constituents.
///
/// Constructed from an ordered list of signals; order is irrelevant to the
/// semantics. The waiter holds strong clones of the constituents for its own
/// lifetime, but the observers it installs capture only weak handles:
/// observation never extends a constituent's lifetime.
pub struct CompositeWaiter {
    derived: Signal,
    constituents: Vec<Signal>,
}

impl CompositeWaiter {
    /// Builds the OR of the given signals.
    ///
    /// The derived value is computed once from the current constituent
    /// states, then again inside every constituent's observer, so a
    /// transition between construction and the first wait is not lost.
    #[must_use]
    pub fn new<I>(signals: I) -> Self
    where
        I: IntoIterator<Item = Signal>,
    {
        let constituents: Vec<Signal> = signals.into_iter().collect();
        let derived = Signal::new();

        let weak_constituents: Vec<WeakSignal> =
            constituents.iter().map(Signal::downgrade).collect();
        for constituent in &constituents {
            let weak_constituents = weak_constituents.clone();
            let weak_derived = derived.downgrade();
            constituent.observe(move || {
                let Some(derived) = weak_derived.upgrade() else {
                    return;
                };
                let any_set = weak_constituents
                    .iter()
                    .filter_map(WeakSignal::upgrade)
                    .any(|signal| signal.is_set());
                if any_set {
                    derived.set();
                } else {
                    derived.clear();
                }
            });
        }

        if constituents.iter().any(Signal::is_set) {
            derived.set();
        }

        Self {
            derived,
            constituents,
        }
    }

    /// Returns whether any constituent is currently set.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.derived.is_set()
    }

    /// Waits until any constituent is set or the timeout elapses.
    ///
    /// Delegates to the derived signal; returns whether it was observed set.
    pub async fn wait(&self, timeout: Duration) -> bool {
        self.derived.wait(timeout).await
    }

    /// Returns the derived signal.
    #[must_use]
    pub fn signal(&self) -> &Signal {
        &self.derived
    }

    /// Returns the constituent signals this waiter observes.
    #[must_use]
    pub fn constituents(&self) -> &[Signal] {
        &self.constituents
    }
}

impl std::fmt::Debug for CompositeWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeWaiter")
            .field("set", &self.is_set())
            .field("constituents", &self.constituents.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_or_of_two_signals() {
        let a = Signal::new();
        let b = Signal::new();
        let waiter = CompositeWaiter::new([a.clone(), b.clone()]);

        assert!(!waiter.is_set());
        a.set();
        assert!(waiter.is_set());
        a.clear();
        assert!(!waiter.is_set());
        b.set();
        assert!(waiter.is_set());
    }

    #[test]
    fn test_set_before_construction_is_not_lost() {
        let a = Signal::new();
        let b = Signal::new();
        a.set();

        let waiter = CompositeWaiter::new([a, b]);
        assert!(waiter.is_set());
    }

    #[test]
    fn test_stays_set_while_any_constituent_is() {
        let a = Signal::new();
        let b = Signal::new();
        let waiter = CompositeWaiter::new([a.clone(), b.clone()]);

        a.set();
        b.set();
        a.clear();
        assert!(waiter.is_set());
        b.clear();
        assert!(!waiter.is_set());
    }

    #[test]
    fn test_empty_waiter_never_set() {
        let waiter = CompositeWaiter::new([]);
        assert!(!waiter.is_set());
        assert!(waiter.constituents().is_empty());
    }

    #[tokio::test]
    async fn test_wait_resolves_on_any_constituent() {
        let a = Signal::new();
        let b = Signal::new();
        let waiter = CompositeWaiter::new([a, b.clone()]);

        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            b.set();
        });
        assert!(waiter.wait(std::time::Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_wait_times_out_when_nothing_fires() {
        let a = Signal::new();
        let waiter = CompositeWaiter::new([a]);
        assert!(!waiter.wait(std::time::Duration::from_millis(50)).await);
    }

    #[test]
    fn test_producer_handle_drop_does_not_wedge_the_or() {
        let a = Signal::new();
        let b = Signal::new();
        let waiter = CompositeWaiter::new([a.clone(), b.clone()]);

        a.set();
        assert!(waiter.is_set());

        // The waiter keeps its own clone of `a`, so the producer dropping
        // its handle must not change what the OR computes.
        drop(a);
        b.set();
        b.clear();
        assert!(waiter.is_set());
    }

    proptest! {
        // For every interleaving of set/clear operations over three
        // signals, the derived value equals the OR of the constituents.
        #[test]
        fn derived_always_matches_or(
            ops in prop::collection::vec((0usize..3, any::<bool>()), 0..32)
        ) {
            let signals: Vec<Signal> = (0..3).map(|_| Signal::new()).collect();
            let waiter = CompositeWaiter::new(signals.iter().cloned());

            for (index, set) in ops {
                if set {
                    signals[index].set();
                } else {
                    signals[index].clear();
                }
                let expected = signals.iter().any(Signal::is_set);
                prop_assert_eq!(waiter.is_set(), expected);
            }
        }
    }
}
