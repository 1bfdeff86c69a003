//! Actor/mailbox concurrency runtime (spec §4.A): serial per-actor mailboxes,
//! a shared timer wheel for delayed work, and the worker pool they run on.
pub mod mailbox;
pub mod scheduler;
pub mod timer;

pub use mailbox::{Actor, Mailbox};
pub use scheduler::Scheduler;
pub use timer::{Timer, TimerWheel};
