pub mod candidate;
pub mod deliveries;
pub mod distance;
pub mod driver;
pub mod engine;
pub mod error;
pub mod reservation;
pub mod route_builder;
pub mod sale;

pub use candidate::{find_candidate, find_local_then_county, Candidate, Placed, SearchScope};
pub use deliveries::*;
pub use distance::*;
pub use engine::*;
pub use error::*;
pub use route_builder::*;
