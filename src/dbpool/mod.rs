//! Database pool and registry (spec §4.F).
pub mod pool;
pub mod registry;

pub use pool::{Borrowed, DatabasePool, DbHandle};
pub use registry::{make_keyspace, parse_keyspace, is_valid_database_name, CollectionSpec, DatabaseRegistry};
