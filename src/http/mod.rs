//! HTTP/Sync listener (spec §4.G): hand-rolled HTTP/1.1 over raw TCP rather
//! than a framework, so a WebSocket upgrade can detach the socket straight
//! to the codec in `crate::ws`.
pub mod handlers;
pub mod listener;
pub mod request;
pub mod response;
pub mod router;
pub mod tasks;
pub mod upgrade;

pub use handlers::AppState;
pub use listener::Listener;
pub use request::{Method, Request};
pub use response::Response;
pub use router::Router;
pub use tasks::{Task, TaskRegistry, TaskStatus};
