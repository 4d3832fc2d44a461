//! Store collaborator contracts for firewood logistics.
//!
//! - [`GraphStore`]: requests, matching relationships, travel edges
//! - [`RouteStore`]: planned/ongoing routes, completion records, reference data
//! - [`FailedMatchStore`]: failed matches kept across cycles
//!
//! In-memory backends are provided for every trait, plus a SQLite backend
//! for the failed-match ledger.

pub mod counters;
pub mod cursor;
pub mod error;
pub mod failed;
pub mod graph;
pub mod memory;
pub mod routes;
pub mod sqlite_store;

pub use counters::*;
pub use cursor::*;
pub use error::*;
pub use failed::*;
pub use graph::*;
pub use memory::*;
pub use routes::*;
pub use sqlite_store::*;
