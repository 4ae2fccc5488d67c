//! Common teardown contract shared by the monitors.

use async_trait::async_trait;

use crate::signal::Signal;

/// Lifecycle surface the orchestrator tears a monitor down through.
///
/// `stop` is idempotent and safe to call concurrently with the monitor's
/// own task; `join` waits for that task to finish. Both may be called
/// before `start`, after which they are no-ops.
#[async_trait]
pub trait Monitor {
    /// The monitor's failure signal.
    fn failed(&self) -> &Signal;

    /// Requests a stop and terminates the currently-owned process group.
    async fn stop(&self);

    /// Waits for the monitor task to finish.
    async fn join(&mut self);
}

/// Stops a monitor and waits for its task, in that order.
pub async fn stop_and_join<M>(monitor: &mut M)
where
    M: Monitor + Send,
{
    monitor.stop().await;
    monitor.join().await;
}
