//! Route lifecycle for firewood logistics.
//!
//! [`RouteLifecycle`] moves a driver's route through
//! `planned → ongoing → finished → all_delivered` (or `missing_payments`),
//! recording each visit exactly once and settling deals with sellers and
//! drivers through the payment, invoicing and notification collaborators.

pub mod dues;
pub mod error;
pub mod invoicing;
pub mod lifecycle;
pub mod notifications;
pub mod payments;
pub mod visits;
pub mod wrapup;

pub use dues::*;
pub use error::*;
pub use invoicing::*;
pub use lifecycle::*;
pub use notifications::*;
pub use payments::*;
pub use visits::*;
