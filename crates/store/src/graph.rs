use async_trait::async_trait;
use firewood_types::{
    BuyRequest, DriveRequest, Relationship, RelationshipKind, SellRequest, Travel, TravelKind,
    TravelStatus, UserContact,
};
use serde::{Deserialize, Serialize};

use crate::{SellCounterDelta, StoreError};

// ═══════════════════════════════════════════════════════════════════════════
// CORE TYPES
// ═══════════════════════════════════════════════════════════════════════════

/// One page of a bulk relationship query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor for the next page, `None` when exhausted
    pub next: Option<String>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next: None,
        }
    }
}

/// Partial update of a buyer's flags; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuyRequestUpdate {
    pub reserve_target: Option<Option<String>>,
    pub claimed_by_driver: Option<bool>,
    pub reserved_weeks: Option<u32>,
    pub last_calced: Option<u64>,
}

impl BuyRequestUpdate {
    pub fn reserve_target(mut self, seller: Option<String>) -> Self {
        self.reserve_target = Some(seller);
        self
    }

    pub fn claimed_by_driver(mut self, claimed: bool) -> Self {
        self.claimed_by_driver = Some(claimed);
        self
    }

    pub fn reserved_weeks(mut self, weeks: u32) -> Self {
        self.reserved_weeks = Some(weeks);
        self
    }

    pub fn last_calced(mut self, ts: u64) -> Self {
        self.last_calced = Some(ts);
        self
    }

    pub fn apply(&self, buyer: &mut BuyRequest) {
        if let Some(target) = &self.reserve_target {
            buyer.reserve_target = target.clone();
        }
        if let Some(claimed) = self.claimed_by_driver {
            buyer.claimed_by_driver = claimed;
        }
        if let Some(weeks) = self.reserved_weeks {
            buyer.reserved_weeks = weeks;
        }
        if let Some(ts) = self.last_calced {
            buyer.last_calced = ts;
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// STORE TRAIT
// ═══════════════════════════════════════════════════════════════════════════

/// Graph-shaped persistence of requests and the relationships between them.
///
/// Every call is atomic on its own; callers never assume a transaction
/// spanning several calls.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Counties that hold at least one request
    async fn counties(&self) -> Result<Vec<String>, StoreError>;

    async fn sell_requests_in_county(&self, county: &str) -> Result<Vec<SellRequest>, StoreError>;

    async fn buy_requests_in_county(&self, county: &str) -> Result<Vec<BuyRequest>, StoreError>;

    async fn drive_requests_in_county(&self, county: &str)
        -> Result<Vec<DriveRequest>, StoreError>;

    async fn get_sell_request(&self, name: &str) -> Result<Option<SellRequest>, StoreError>;

    async fn get_buy_request(&self, name: &str) -> Result<Option<BuyRequest>, StoreError>;

    async fn get_drive_request(&self, name: &str) -> Result<Option<DriveRequest>, StoreError>;

    /// User owning the named sell, buy or drive request
    async fn user_for_request(&self, request: &str) -> Result<Option<UserContact>, StoreError>;

    /// Apply a counter delta to a seller and return the updated record
    async fn update_sell_counters(
        &self,
        name: &str,
        delta: SellCounterDelta,
    ) -> Result<SellRequest, StoreError>;

    /// Apply a counter delta at most once per `key`.
    ///
    /// Returns `None` when an update under the same key was already applied;
    /// the key check and the counter change are a single atomic step.
    async fn update_sell_counters_once(
        &self,
        name: &str,
        key: &str,
        delta: SellCounterDelta,
    ) -> Result<Option<SellRequest>, StoreError>;

    async fn update_buy_request(
        &self,
        name: &str,
        update: BuyRequestUpdate,
    ) -> Result<BuyRequest, StoreError>;

    /// Add `delta` to a driver's staged pickup count
    async fn update_staged_pickups(
        &self,
        driver: &str,
        delta: i64,
    ) -> Result<DriveRequest, StoreError>;

    async fn reset_staged_pickups(&self, driver: &str) -> Result<(), StoreError>;

    async fn set_driver_availability(
        &self,
        driver: &str,
        available: bool,
        available_again_time: u64,
    ) -> Result<(), StoreError>;

    /// Create a relationship. Returns `false` when its source already has one of that kind.
    async fn create_relationship(&self, relationship: Relationship) -> Result<bool, StoreError>;

    /// Delete the relationship of `kind` leaving `source` (buyer, or seller for staged drives)
    async fn delete_relationship(
        &self,
        kind: RelationshipKind,
        source: &str,
    ) -> Result<Option<Relationship>, StoreError>;

    async fn get_relationship(
        &self,
        kind: RelationshipKind,
        source: &str,
    ) -> Result<Option<Relationship>, StoreError>;

    /// Relationships of `kind` pointing at `target` (seller, or driver for staged drives)
    async fn relationships_to(
        &self,
        kind: RelationshipKind,
        target: &str,
    ) -> Result<Vec<Relationship>, StoreError>;

    /// Page through relationships of `kind` in a county, ordered by source name
    async fn relationships_page(
        &self,
        kind: RelationshipKind,
        county: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Page<Relationship>, StoreError>;

    async fn insert_travel(&self, travel: Travel) -> Result<(), StoreError>;

    async fn travels_for_driver(&self, driver: &str) -> Result<Vec<Travel>, StoreError>;

    /// Returns `false` when no matching travel edge exists
    async fn set_travel_status(
        &self,
        driver: &str,
        kind: TravelKind,
        counterparty: &str,
        status: TravelStatus,
    ) -> Result<bool, StoreError>;

    async fn remove_travels_for_driver(&self, driver: &str) -> Result<usize, StoreError>;
}
