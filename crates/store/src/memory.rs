use async_trait::async_trait;
use firewood_types::{
    BuyRequest, ClosedDeal, Company, DriveRequest, OngoingRoute, PlannedRoute, Relationship,
    RelationshipKind, RouteStatus, SellRequest, Travel, TravelKind, TravelStatus, UserContact,
    VisitKey, VisitRecord, VisitedStatus, WrapUpSummary,
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::{
    BuyRequestUpdate, GraphStore, InsertOutcome, Page, RouteStore, SellCounterDelta, StoreError,
    UpsertOutcome,
};

// ═══════════════════════════════════════════════════════════════════════════
// IN-MEMORY GRAPH STORE
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct GraphState {
    sellers: BTreeMap<String, SellRequest>,
    buyers: BTreeMap<String, BuyRequest>,
    drivers: BTreeMap<String, DriveRequest>,
    users: HashMap<String, UserContact>,
    /// Edge tables keyed by (kind, source)
    relationships: BTreeMap<(RelationshipKind, String), Relationship>,
    travels: Vec<Travel>,
    /// Keys of counter updates applied through `update_sell_counters_once`
    applied_updates: BTreeSet<String>,
}

/// Graph store backed by ordered maps; every method holds one lock for its whole body
#[derive(Debug, Default, Clone)]
pub struct InMemoryGraphStore {
    state: Arc<RwLock<GraphState>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_sell_request(&self, seller: SellRequest) {
        let mut state = self.state.write().await;
        state.sellers.insert(seller.name.clone(), seller);
    }

    pub async fn insert_buy_request(&self, buyer: BuyRequest) {
        let mut state = self.state.write().await;
        state.buyers.insert(buyer.name.clone(), buyer);
    }

    pub async fn insert_drive_request(&self, driver: DriveRequest) {
        let mut state = self.state.write().await;
        state.drivers.insert(driver.name.clone(), driver);
    }

    /// Link a user to the request it owns
    pub async fn insert_user(&self, request: impl Into<String>, user: UserContact) {
        let mut state = self.state.write().await;
        state.users.insert(request.into(), user);
    }

    /// Every relationship of `kind`, across counties
    pub async fn relationships(&self, kind: RelationshipKind) -> Vec<Relationship> {
        let state = self.state.read().await;
        state
            .relationships
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, r)| r.clone())
            .collect()
    }
}

fn apply_logged(
    seller: &SellRequest,
    delta: &SellCounterDelta,
) -> Result<SellRequest, StoreError> {
    delta.apply(seller).map_err(|e| {
        warn!(seller = %seller.name, delta = ?delta, error = %e, "Counter update rejected");
        e
    })
}

fn relationship_target(relationship: &Relationship) -> &str {
    match relationship {
        Relationship::Reservation(r) => &r.sell_request,
        Relationship::StagedSell(s) => &s.sell_request,
        Relationship::StagedDrive(d) => &d.drive_request,
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn counties(&self) -> Result<Vec<String>, StoreError> {
        let state = self.state.read().await;
        let counties: BTreeSet<String> = state
            .sellers
            .values()
            .map(|s| s.location.county.clone())
            .chain(state.buyers.values().map(|b| b.location.county.clone()))
            .chain(state.drivers.values().map(|d| d.location.county.clone()))
            .collect();
        Ok(counties.into_iter().collect())
    }

    async fn sell_requests_in_county(&self, county: &str) -> Result<Vec<SellRequest>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .sellers
            .values()
            .filter(|s| s.location.county == county)
            .cloned()
            .collect())
    }

    async fn buy_requests_in_county(&self, county: &str) -> Result<Vec<BuyRequest>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .buyers
            .values()
            .filter(|b| b.location.county == county)
            .cloned()
            .collect())
    }

    async fn drive_requests_in_county(
        &self,
        county: &str,
    ) -> Result<Vec<DriveRequest>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .drivers
            .values()
            .filter(|d| d.location.county == county)
            .cloned()
            .collect())
    }

    async fn get_sell_request(&self, name: &str) -> Result<Option<SellRequest>, StoreError> {
        Ok(self.state.read().await.sellers.get(name).cloned())
    }

    async fn get_buy_request(&self, name: &str) -> Result<Option<BuyRequest>, StoreError> {
        Ok(self.state.read().await.buyers.get(name).cloned())
    }

    async fn get_drive_request(&self, name: &str) -> Result<Option<DriveRequest>, StoreError> {
        Ok(self.state.read().await.drivers.get(name).cloned())
    }

    async fn user_for_request(&self, request: &str) -> Result<Option<UserContact>, StoreError> {
        Ok(self.state.read().await.users.get(request).cloned())
    }

    async fn update_sell_counters(
        &self,
        name: &str,
        delta: SellCounterDelta,
    ) -> Result<SellRequest, StoreError> {
        let mut state = self.state.write().await;
        let seller = state
            .sellers
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        *seller = apply_logged(seller, &delta)?;
        Ok(seller.clone())
    }

    async fn update_sell_counters_once(
        &self,
        name: &str,
        key: &str,
        delta: SellCounterDelta,
    ) -> Result<Option<SellRequest>, StoreError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if state.applied_updates.contains(key) {
            debug!(seller = %name, key = %key, "Counter update already applied");
            return Ok(None);
        }
        let seller = state
            .sellers
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        *seller = apply_logged(seller, &delta)?;
        state.applied_updates.insert(key.to_string());
        Ok(Some(seller.clone()))
    }

    async fn update_buy_request(
        &self,
        name: &str,
        update: BuyRequestUpdate,
    ) -> Result<BuyRequest, StoreError> {
        let mut state = self.state.write().await;
        let buyer = state
            .buyers
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        update.apply(buyer);
        Ok(buyer.clone())
    }

    async fn update_staged_pickups(
        &self,
        driver: &str,
        delta: i64,
    ) -> Result<DriveRequest, StoreError> {
        let mut state = self.state.write().await;
        let entry = state
            .drivers
            .get_mut(driver)
            .ok_or_else(|| StoreError::NotFound(driver.to_string()))?;
        let next = i64::from(entry.num_staged_pickups) + delta;
        entry.num_staged_pickups =
            u32::try_from(next).map_err(|_| StoreError::CounterUnderflow {
                name: driver.to_string(),
                field: "num_staged_pickups",
            })?;
        Ok(entry.clone())
    }

    async fn reset_staged_pickups(&self, driver: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let entry = state
            .drivers
            .get_mut(driver)
            .ok_or_else(|| StoreError::NotFound(driver.to_string()))?;
        entry.num_staged_pickups = 0;
        Ok(())
    }

    async fn set_driver_availability(
        &self,
        driver: &str,
        available: bool,
        available_again_time: u64,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let entry = state
            .drivers
            .get_mut(driver)
            .ok_or_else(|| StoreError::NotFound(driver.to_string()))?;
        entry.available = available;
        entry.available_again_time = available_again_time;
        Ok(())
    }

    async fn create_relationship(&self, relationship: Relationship) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let key = (relationship.kind(), relationship.source().to_string());
        if state.relationships.contains_key(&key) {
            return Ok(false);
        }
        state.relationships.insert(key, relationship);
        Ok(true)
    }

    async fn delete_relationship(
        &self,
        kind: RelationshipKind,
        source: &str,
    ) -> Result<Option<Relationship>, StoreError> {
        let mut state = self.state.write().await;
        Ok(state.relationships.remove(&(kind, source.to_string())))
    }

    async fn get_relationship(
        &self,
        kind: RelationshipKind,
        source: &str,
    ) -> Result<Option<Relationship>, StoreError> {
        let state = self.state.read().await;
        Ok(state.relationships.get(&(kind, source.to_string())).cloned())
    }

    async fn relationships_to(
        &self,
        kind: RelationshipKind,
        target: &str,
    ) -> Result<Vec<Relationship>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .relationships
            .iter()
            .filter(|((k, _), r)| *k == kind && relationship_target(r) == target)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn relationships_page(
        &self,
        kind: RelationshipKind,
        county: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Page<Relationship>, StoreError> {
        if limit == 0 {
            return Ok(Page::empty());
        }
        let state = self.state.read().await;
        let mut matching = state
            .relationships
            .iter()
            .filter(|((k, source), r)| {
                *k == kind
                    && r.county() == county
                    && after.map_or(true, |cursor| source.as_str() > cursor)
            })
            .map(|(_, r)| r.clone());

        let items: Vec<Relationship> = matching.by_ref().take(limit).collect();
        let next = if matching.next().is_some() {
            items.last().map(|r| r.source().to_string())
        } else {
            None
        };
        Ok(Page { items, next })
    }

    async fn insert_travel(&self, travel: Travel) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let duplicate = state.travels.iter().any(|t| {
            t.drive_request == travel.drive_request
                && t.kind == travel.kind
                && t.counterparty == travel.counterparty
        });
        if duplicate {
            return Err(StoreError::DuplicateId(format!(
                "{}->{}",
                travel.drive_request, travel.counterparty
            )));
        }
        state.travels.push(travel);
        Ok(())
    }

    async fn travels_for_driver(&self, driver: &str) -> Result<Vec<Travel>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .travels
            .iter()
            .filter(|t| t.drive_request == driver)
            .cloned()
            .collect())
    }

    async fn set_travel_status(
        &self,
        driver: &str,
        kind: TravelKind,
        counterparty: &str,
        status: TravelStatus,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state
            .travels
            .iter_mut()
            .find(|t| t.drive_request == driver && t.kind == kind && t.counterparty == counterparty)
        {
            Some(travel) => {
                travel.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_travels_for_driver(&self, driver: &str) -> Result<usize, StoreError> {
        let mut state = self.state.write().await;
        let before = state.travels.len();
        state.travels.retain(|t| t.drive_request != driver);
        Ok(before - state.travels.len())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-MEMORY ROUTE STORE
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct RouteState {
    planned: BTreeMap<String, PlannedRoute>,
    ongoing: BTreeMap<String, OngoingRoute>,
    records: BTreeMap<VisitKey, VisitRecord>,
    wrapups: BTreeMap<String, WrapUpSummary>,
    county_prices: HashMap<String, Decimal>,
    companies: Vec<Company>,
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryRouteStore {
    state: Arc<RwLock<RouteState>>,
}

impl InMemoryRouteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_county_price(&self, county: impl Into<String>, price: Decimal) {
        let mut state = self.state.write().await;
        state.county_prices.insert(county.into(), price);
    }

    pub async fn insert_company(&self, company: Company) {
        let mut state = self.state.write().await;
        state.companies.push(company);
    }

    pub async fn ongoing_routes(&self) -> Vec<OngoingRoute> {
        self.state.read().await.ongoing.values().cloned().collect()
    }
}

#[async_trait]
impl RouteStore for InMemoryRouteStore {
    async fn get_planned_route(&self, driver: &str) -> Result<Option<PlannedRoute>, StoreError> {
        Ok(self.state.read().await.planned.get(driver).cloned())
    }

    async fn upsert_planned_route(
        &self,
        mut route: PlannedRoute,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut state = self.state.write().await;
        if let Some(ongoing) = state
            .ongoing
            .values()
            .find(|r| r.drive_request == route.drive_request && r.status.is_active())
        {
            debug!(driver = %route.drive_request, route_id = %ongoing.id, "Planned route refused, driver busy");
            return Ok(UpsertOutcome::DriverBusy {
                ongoing_route: ongoing.id.clone(),
            });
        }
        match state.planned.get(&route.drive_request) {
            Some(existing) => {
                route.created_at = existing.created_at;
                route.updated_at = Some(route.calc_time);
                state.planned.insert(route.drive_request.clone(), route);
                Ok(UpsertOutcome::Replaced)
            }
            None => {
                state.planned.insert(route.drive_request.clone(), route);
                Ok(UpsertOutcome::Created)
            }
        }
    }

    async fn delete_planned_route(
        &self,
        driver: &str,
    ) -> Result<Option<PlannedRoute>, StoreError> {
        Ok(self.state.write().await.planned.remove(driver))
    }

    async fn insert_ongoing_route(&self, route: OngoingRoute) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let busy = state
            .ongoing
            .values()
            .any(|r| r.drive_request == route.drive_request && r.status.is_active());
        if busy || state.ongoing.contains_key(&route.id) {
            debug!(driver = %route.drive_request, route_id = %route.id, "Ongoing route refused, driver busy");
            return Err(StoreError::DuplicateId(route.drive_request));
        }
        state.ongoing.insert(route.id.clone(), route);
        Ok(())
    }

    async fn get_ongoing_route(&self, id: &str) -> Result<Option<OngoingRoute>, StoreError> {
        Ok(self.state.read().await.ongoing.get(id).cloned())
    }

    async fn active_ongoing_route(
        &self,
        driver: &str,
    ) -> Result<Option<OngoingRoute>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .ongoing
            .values()
            .find(|r| r.drive_request == driver && r.status.is_active())
            .cloned())
    }

    async fn transition_route_status(
        &self,
        id: &str,
        from: RouteStatus,
        to: RouteStatus,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let route = state
            .ongoing
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if route.status != from {
            debug!(route_id = %id, status = %route.status, expected = %from, "Status transition lost");
            return Ok(false);
        }
        route.status = to;
        Ok(true)
    }

    async fn mark_visit(
        &self,
        id: &str,
        index: usize,
        status: VisitedStatus,
        record_id: Option<String>,
    ) -> Result<OngoingRoute, StoreError> {
        let mut state = self.state.write().await;
        let route = state
            .ongoing
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let entry = route
            .route
            .get_mut(index)
            .ok_or_else(|| StoreError::NotFound(format!("{id}#{index}")))?;
        entry.visited_status = status;
        if record_id.is_some() {
            entry.visited = record_id;
        }
        Ok(route.clone())
    }

    async fn record_closed_deal(
        &self,
        id: &str,
        seller: &str,
        deal: ClosedDeal,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let route = state
            .ongoing
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if route.completed_sell_requests.contains_key(seller) {
            warn!(route_id = %id, seller = %seller, "Deal already closed");
            return Err(StoreError::DuplicateId(format!("{id}/{seller}")));
        }
        route
            .completed_sell_requests
            .insert(seller.to_string(), deal);
        Ok(())
    }

    async fn mark_deal_rebalanced(&self, id: &str, seller: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let deal = state
            .ongoing
            .get_mut(id)
            .and_then(|r| r.completed_sell_requests.get_mut(seller))
            .ok_or_else(|| StoreError::NotFound(format!("{id}/{seller}")))?;
        deal.rebalanced = true;
        Ok(())
    }

    async fn set_route_dues(&self, id: &str, dues: Vec<usize>) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let route = state
            .ongoing
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        route.dues = dues;
        Ok(())
    }

    async fn finalize_route(
        &self,
        id: &str,
        finished_time: u64,
        wrapup_id: Option<String>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let route = state
            .ongoing
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        route.finished_time = Some(finished_time);
        route.wrapup = wrapup_id;
        Ok(())
    }

    async fn insert_visit_record(
        &self,
        record: VisitRecord,
    ) -> Result<InsertOutcome<VisitRecord>, StoreError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.records.get(&record.key) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        state.records.insert(record.key.clone(), record.clone());
        Ok(InsertOutcome::Inserted(record))
    }

    async fn find_visit_record(&self, key: &VisitKey) -> Result<Option<VisitRecord>, StoreError> {
        Ok(self.state.read().await.records.get(key).cloned())
    }

    async fn update_visit_record(&self, record: &VisitRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        match state.records.get_mut(&record.key) {
            Some(existing) if existing.id == record.id => {
                *existing = record.clone();
                Ok(())
            }
            _ => Err(StoreError::NotFound(record.id.clone())),
        }
    }

    async fn visit_records_for_route(
        &self,
        route_id: &str,
    ) -> Result<Vec<VisitRecord>, StoreError> {
        let state = self.state.read().await;
        let mut records: Vec<VisitRecord> = state
            .records
            .values()
            .filter(|r| r.key.ongoing_route == route_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.index);
        Ok(records)
    }

    async fn insert_wrapup(&self, summary: WrapUpSummary) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.wrapups.contains_key(&summary.ongoing_route) {
            return Err(StoreError::DuplicateId(summary.ongoing_route));
        }
        state
            .wrapups
            .insert(summary.ongoing_route.clone(), summary);
        Ok(())
    }

    async fn wrapup_for_route(
        &self,
        route_id: &str,
    ) -> Result<Option<WrapUpSummary>, StoreError> {
        Ok(self.state.read().await.wrapups.get(route_id).cloned())
    }

    async fn county_price(&self, county: &str) -> Result<Option<Decimal>, StoreError> {
        Ok(self.state.read().await.county_prices.get(county).copied())
    }

    async fn find_company(
        &self,
        email: &str,
        phone: Option<&str>,
    ) -> Result<Option<Company>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .companies
            .iter()
            .find(|c| c.matches_contact(email, phone))
            .cloned())
    }
}
