//! Storage engine: SQLite store, buffered write ingress, tier aggregation,
//! and the tier-aware query layer.

pub mod aggregation;
pub mod models;
pub mod query;
pub mod store;
pub mod writer;

pub use models::*;
pub use store::{fmt_time, parse_db_time, AggBucket, DbError, Store};
pub use writer::HeartbeatWriter;
