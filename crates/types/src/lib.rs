pub mod company;
pub mod location;
pub mod notification;
pub mod payment;
pub mod record;
pub mod relationship;
pub mod request;
pub mod route;
pub mod visit;

pub use company::*;
pub use location::*;
pub use notification::*;
pub use payment::*;
pub use record::*;
pub use relationship::*;
pub use request::*;
pub use route::*;
pub use visit::*;

/// Seconds in a day, used for due dates and buyer recalculation age.
pub const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Render a unix timestamp the way completion records display it.
pub fn format_timestamp(ts: u64) -> String {
    chrono::DateTime::from_timestamp(ts as i64, 0)
        .map(|dt| dt.format("%d.%m.%Y %H:%M:%S").to_string())
        .unwrap_or_default()
}
