//! The runtime services shared by every mailbox: a worker-thread pool sized
//! like the original's `std::thread::hardware_concurrency()` (clamped to at
//! least 2) and the single timer wheel used for delayed enqueues (spec §4.A,
//! §5). Grounded in the teacher's `LayerBuilder` (`src/network/layer/builder.rs`),
//! which assembles the long-lived pieces of the network layer once at startup.
use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};

use super::timer::TimerWheel;

/// Number of worker threads to give the Tokio runtime, mirroring
/// `std::thread::hardware_concurrency()` with a floor of 2 (a single-core
/// host still needs a second thread so mailbox work doesn't starve I/O).
pub fn worker_thread_count() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2).max(2)
}

/// Bundles the pieces every actor needs at spawn time: a shared timer wheel
/// and (optionally) a dedicated multi-threaded Tokio runtime for hosts that
/// embed this crate outside of an existing async context.
pub struct Scheduler {
    pub timers: Arc<TimerWheel>,
    runtime: Option<Runtime>,
}

impl Scheduler {
    /// Builds a scheduler that assumes it is called from within an existing
    /// Tokio runtime (mailboxes are spawned with `tokio::spawn`).
    pub fn new() -> Self {
        Scheduler { timers: TimerWheel::new(), runtime: None }
    }

    /// Builds a scheduler that owns its own multi-threaded runtime, sized to
    /// [`worker_thread_count`]. Used by `main.rs` when peersync is the whole
    /// process rather than embedded in a host application.
    pub fn with_owned_runtime() -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_thread_count())
            .thread_name("peersync-worker")
            .enable_all()
            .build()?;
        Ok(Scheduler { timers: TimerWheel::new(), runtime: Some(runtime) })
    }

    pub fn runtime(&self) -> Option<&Runtime> {
        self.runtime.as_ref()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn worker_count_has_floor_of_two() {
        assert!(worker_thread_count() >= 2);
    }

    #[test]
    fn owned_runtime_can_spawn_work() {
        let scheduler = Scheduler::with_owned_runtime().unwrap();
        let rt = scheduler.runtime().unwrap();
        let result = rt.block_on(async { 1 + 1 });
        assert_eq!(result, 2);
    }
}
