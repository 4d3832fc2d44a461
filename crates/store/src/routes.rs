use async_trait::async_trait;
use firewood_types::{
    ClosedDeal, Company, OngoingRoute, PlannedRoute, RouteStatus, VisitKey, VisitRecord,
    VisitedStatus, WrapUpSummary,
};
use rust_decimal::Decimal;

use crate::StoreError;

/// Result of writing a planned route
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Replaced,
    /// The driver has an active ongoing route; nothing was written
    DriverBusy { ongoing_route: String },
}

/// Result of an insert-if-absent on a uniquely keyed record
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome<T> {
    Inserted(T),
    /// Another writer got there first; this is their record
    Existing(T),
}

/// Document-shaped persistence of routes, completion records and reference data
#[async_trait]
pub trait RouteStore: Send + Sync {
    async fn get_planned_route(&self, driver: &str) -> Result<Option<PlannedRoute>, StoreError>;

    /// Write a planned route, replacing any existing one for the driver wholesale.
    /// A replacement keeps the original `created_at` and stamps `updated_at`.
    /// Refuses with `DriverBusy` while the driver has an active ongoing route;
    /// the check and the write are a single atomic step.
    async fn upsert_planned_route(&self, route: PlannedRoute)
        -> Result<UpsertOutcome, StoreError>;

    async fn delete_planned_route(&self, driver: &str)
        -> Result<Option<PlannedRoute>, StoreError>;

    /// Insert an ongoing route. Fails with `DuplicateId` when the driver already
    /// has an active one; the check and the insert are a single atomic step.
    async fn insert_ongoing_route(&self, route: OngoingRoute) -> Result<(), StoreError>;

    async fn get_ongoing_route(&self, id: &str) -> Result<Option<OngoingRoute>, StoreError>;

    /// The driver's route that is not yet `all_delivered`, if any
    async fn active_ongoing_route(&self, driver: &str)
        -> Result<Option<OngoingRoute>, StoreError>;

    /// Compare-and-swap on route status. Returns `false` when `from` did not match.
    async fn transition_route_status(
        &self,
        id: &str,
        from: RouteStatus,
        to: RouteStatus,
    ) -> Result<bool, StoreError>;

    /// Update one visit entry in place and return the route after the change
    async fn mark_visit(
        &self,
        id: &str,
        index: usize,
        status: VisitedStatus,
        record_id: Option<String>,
    ) -> Result<OngoingRoute, StoreError>;

    /// Record a settled deal. Fails with `DuplicateId` when the seller is already closed.
    async fn record_closed_deal(
        &self,
        id: &str,
        seller: &str,
        deal: ClosedDeal,
    ) -> Result<(), StoreError>;

    /// Flag a closed deal once the seller's stock has been rebalanced
    async fn mark_deal_rebalanced(&self, id: &str, seller: &str) -> Result<(), StoreError>;

    async fn set_route_dues(&self, id: &str, dues: Vec<usize>) -> Result<(), StoreError>;

    async fn finalize_route(
        &self,
        id: &str,
        finished_time: u64,
        wrapup_id: Option<String>,
    ) -> Result<(), StoreError>;

    /// Insert a completion record unless one already exists for its key
    async fn insert_visit_record(
        &self,
        record: VisitRecord,
    ) -> Result<InsertOutcome<VisitRecord>, StoreError>;

    async fn find_visit_record(&self, key: &VisitKey) -> Result<Option<VisitRecord>, StoreError>;

    async fn update_visit_record(&self, record: &VisitRecord) -> Result<(), StoreError>;

    async fn visit_records_for_route(&self, route_id: &str)
        -> Result<Vec<VisitRecord>, StoreError>;

    /// Store the wrap-up summary. Fails with `DuplicateId` when the route already has one.
    async fn insert_wrapup(&self, summary: WrapUpSummary) -> Result<(), StoreError>;

    async fn wrapup_for_route(&self, route_id: &str)
        -> Result<Option<WrapUpSummary>, StoreError>;

    /// Price per bag configured for deliveries into `county`
    async fn county_price(&self, county: &str) -> Result<Option<Decimal>, StoreError>;

    /// Company reachable by the given email or phone
    async fn find_company(
        &self,
        email: &str,
        phone: Option<&str>,
    ) -> Result<Option<Company>, StoreError>;
}
