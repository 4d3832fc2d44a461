use firewood_store::{
    BuyRequestUpdate, GraphStore, RouteStore, SellCounterDelta, StoreError, UpsertOutcome,
};
use firewood_types::{
    Company, ContentType, Notification, NotificationStatus, OngoingRoute, PlannedRoute,
    RelationshipKind, SECONDS_PER_DAY, Visit,
};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    DuesHandler, HoldUntilPaid, InvoiceService, LifecycleError, Notifier, PaymentGateway,
};

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Time a driver has to finish a claimed route
    pub claim_due_secs: u64,

    /// Price per bag when neither county nor seller sets one
    pub default_price_per_bag: Decimal,

    /// Length of the delivery confirmation code
    pub confirmation_code_length: usize,

    /// Hold wrap-up until every buyer has paid
    pub require_paid_before_settlement: bool,

    /// Company receiving outgoing invoices
    pub operator: Company,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            claim_due_secs: 2 * SECONDS_PER_DAY, // 2 days
            default_price_per_bag: Decimal::new(150, 0),
            confirmation_code_length: 4,
            require_paid_before_settlement: false,
            operator: default_operator(),
        }
    }
}

pub fn default_operator() -> Company {
    Company {
        name: "VEDBJØRN AS".to_string(),
        companynum: "929350790".to_string(),
        address: "Adalsveien 1B , 3185 , SKOPPUM".to_string(),
        email: "regninger@vedbjorn.no".to_string(),
        phone: None,
        account_number: None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// OUTCOMES
// ═══════════════════════════════════════════════════════════════════════════

/// What happened to a proposed route
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOutcome {
    Created,
    Replaced,
    /// The driver is mid-route; the proposal was dropped
    Rejected { ongoing_route: String },
}

// ═══════════════════════════════════════════════════════════════════════════
// STATE MACHINE
// ═══════════════════════════════════════════════════════════════════════════

/// Drives a route from proposal to wrap-up.
///
/// Every transition is a separate call; nothing here waits on a driver or
/// buyer. Exactly-once effects rest on the stores' atomic primitives
/// (`insert_ongoing_route`, `insert_visit_record`, `transition_route_status`,
/// `record_closed_deal`).
pub struct RouteLifecycle {
    pub(crate) graph: Arc<dyn GraphStore>,
    pub(crate) routes: Arc<dyn RouteStore>,
    pub(crate) payments: Arc<dyn PaymentGateway>,
    pub(crate) invoices: Arc<dyn InvoiceService>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) dues: Arc<dyn DuesHandler>,
    pub(crate) config: LifecycleConfig,
}

impl RouteLifecycle {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        routes: Arc<dyn RouteStore>,
        payments: Arc<dyn PaymentGateway>,
        invoices: Arc<dyn InvoiceService>,
        notifier: Arc<dyn Notifier>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            graph,
            routes,
            payments,
            invoices,
            notifier,
            dues: Arc::new(HoldUntilPaid),
            config,
        }
    }

    pub fn with_dues_handler(mut self, dues: Arc<dyn DuesHandler>) -> Self {
        self.dues = dues;
        self
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Persist freshly built routes as planned routes
    pub async fn handle_routes(
        &self,
        routes: &BTreeMap<String, Vec<Visit>>,
        calc_time: u64,
    ) -> Result<BTreeMap<String, PlanOutcome>, LifecycleError> {
        let mut outcomes = BTreeMap::new();
        for (driver, visits) in routes {
            let outcome = self
                .overwrite_planned_route(driver, visits.clone(), calc_time)
                .await?;
            outcomes.insert(driver.clone(), outcome);
        }
        Ok(outcomes)
    }

    /// Replace the driver's planned route wholesale.
    ///
    /// A driver with an active ongoing route is marked unavailable instead;
    /// the store refuses the write in the same step as the busy check.
    /// Sellers are told about their new assignment only when the plan is new.
    pub async fn overwrite_planned_route(
        &self,
        driver: &str,
        route: Vec<Visit>,
        calc_time: u64,
    ) -> Result<PlanOutcome, LifecycleError> {
        let planned = PlannedRoute::new(driver, route, calc_time);
        let deals = planned.deals.clone();
        let outcome = self.routes.upsert_planned_route(planned).await?;

        match outcome {
            UpsertOutcome::Created => {
                info!(driver = %driver, sellers = deals.len(), "Planned route created");
                for (seller, deal) in &deals {
                    let text = format!(
                        "Du har et nytt oppdrag: {} vedsekker skal hentes",
                        deal.number_of_bags_sold
                    );
                    let draft = Notification::new(
                        "",
                        ContentType::NewAssignment,
                        NotificationStatus::New,
                        text,
                        calc_time,
                    )
                    .with_amount(deal.number_of_bags_sold);
                    self.notify_owner(seller, draft).await;
                }
                Ok(PlanOutcome::Created)
            }
            UpsertOutcome::Replaced => {
                debug!(driver = %driver, "Planned route replaced");
                Ok(PlanOutcome::Replaced)
            }
            UpsertOutcome::DriverBusy { ongoing_route } => {
                warn!(
                    driver = %driver,
                    route_id = %ongoing_route,
                    "Driver already on a route, rejecting new plan"
                );
                self.graph.set_driver_availability(driver, false, 0).await?;
                Ok(PlanOutcome::Rejected { ongoing_route })
            }
        }
    }

    /// Driver turns the proposal down: the plan and its bindings are dropped
    /// and the driver goes back into the pool
    pub async fn decline_planned_route(&self, driver: &str) -> Result<(), LifecycleError> {
        if self.routes.delete_planned_route(driver).await?.is_none() {
            return Err(LifecycleError::PlannedRouteNotFound(driver.to_string()));
        }
        self.release_driver(driver).await?;
        info!(driver = %driver, "Planned route declined");
        Ok(())
    }

    /// Promote the driver's planned route to an ongoing one.
    ///
    /// Fails with `DriverBusy` when the driver already has an active route;
    /// the store makes that check and the insert one step. Every store change
    /// lands before the first notification goes out, so a notifier outage
    /// cannot leave a half-claimed route behind.
    pub async fn claim_planned_route(
        &self,
        driver: &str,
        calc_time: u64,
    ) -> Result<OngoingRoute, LifecycleError> {
        let planned = self
            .routes
            .get_planned_route(driver)
            .await?
            .ok_or_else(|| LifecycleError::PlannedRouteNotFound(driver.to_string()))?;

        let id = format!("route-{}", Uuid::new_v4());
        let due = calc_time + self.config.claim_due_secs;
        let ongoing = OngoingRoute::from_planned(id, planned, calc_time, due);

        self.routes
            .insert_ongoing_route(ongoing.clone())
            .await
            .map_err(|e| match e {
                StoreError::DuplicateId(_) => LifecycleError::DriverBusy(driver.to_string()),
                other => LifecycleError::Store(other),
            })?;
        self.graph.set_driver_availability(driver, false, 0).await?;

        for entry in &ongoing.route {
            match &entry.visit {
                Visit::Pickup { sell_request, .. } => {
                    let bags = entry.visit.loaded_here();
                    self.graph
                        .update_sell_counters(
                            &sell_request.name,
                            SellCounterDelta::prepare_for_pickup(i64::from(bags)),
                        )
                        .await?;
                }
                Visit::Delivery { buy_request, .. } => {
                    self.graph
                        .update_buy_request(
                            &buy_request.name,
                            BuyRequestUpdate::default().claimed_by_driver(true),
                        )
                        .await?;
                }
                Visit::Return { .. } => {}
            }
        }
        self.routes.delete_planned_route(driver).await?;

        for entry in &ongoing.route {
            match &entry.visit {
                Visit::Pickup { sell_request, .. } => {
                    let bags = entry.visit.loaded_here();
                    let draft = Notification::new(
                        "",
                        ContentType::Pickup,
                        NotificationStatus::Requested,
                        format!("En sjåfør kommer for å hente {bags} vedsekker"),
                        calc_time,
                    )
                    .with_amount(bags)
                    .with_reference(&ongoing.id);
                    self.notify_owner(&sell_request.name, draft).await;
                }
                Visit::Delivery { buy_request, .. } => {
                    let draft = Notification::new(
                        "",
                        ContentType::Delivery,
                        NotificationStatus::Requested,
                        "Veden din er på vei",
                        calc_time,
                    )
                    .with_amount(buy_request.current_requirement)
                    .with_reference(&ongoing.id);
                    self.notify_owner(&buy_request.name, draft).await;
                }
                Visit::Return { .. } => {}
            }
        }

        info!(
            driver = %driver,
            route_id = %ongoing.id,
            visits = ongoing.route.len(),
            due,
            "Route claimed"
        );
        Ok(ongoing)
    }

    /// Drop every pickup binding and travel edge of a driver and make them
    /// available again
    pub(crate) async fn release_driver(&self, driver: &str) -> Result<(), LifecycleError> {
        let travels = self.graph.remove_travels_for_driver(driver).await?;
        let bindings = self
            .graph
            .relationships_to(RelationshipKind::StagedDrive, driver)
            .await?;
        for binding in &bindings {
            self.graph
                .delete_relationship(RelationshipKind::StagedDrive, binding.source())
                .await?;
        }
        self.graph.reset_staged_pickups(driver).await?;
        self.graph.set_driver_availability(driver, true, 0).await?;

        debug!(
            driver = %driver,
            travels,
            bindings = bindings.len(),
            "Driver released"
        );
        Ok(())
    }

    /// Send `notification` to the user owning `request`. Users without
    /// contact details are skipped with a warning.
    pub(crate) async fn notify_owner(
        &self,
        request: &str,
        mut notification: Notification,
    ) -> Option<String> {
        let user = match self.graph.user_for_request(request).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!(request = %request, content_type = ?notification.content_type, "No user to notify");
                return None;
            }
            Err(e) => {
                warn!(request = %request, error = %e, "User lookup failed, notification dropped");
                return None;
            }
        };
        notification.recipient = user.email;
        self.send(notification).await
    }

    /// Queue a notification. A notifier outage is logged and never fails
    /// the caller.
    pub(crate) async fn send(&self, notification: Notification) -> Option<String> {
        let recipient = notification.recipient.clone();
        let content_type = notification.content_type;
        match self.notifier.notify(notification).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(
                    recipient = %recipient,
                    content_type = ?content_type,
                    error = %e,
                    "Notification not sent"
                );
                None
            }
        }
    }
}
