use firewood_store::InsertOutcome;
use firewood_types::{
    ContentType, Notification, NotificationStatus, OngoingRoute, PaymentReference, RouteStatus,
    TravelKind, TravelStatus, UserContact, Visit, VisitKey, VisitKind, VisitRecord,
    VisitedStatus,
};
use rand::distributions::Uniform;
use rand::Rng;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{LifecycleError, RouteLifecycle};

/// Result of executing one visit of an ongoing route
#[derive(Debug, Clone, PartialEq)]
pub enum VisitOutcome {
    Completed(VisitRecord),
    /// The visit was already recorded; this is the stored record
    Already(VisitRecord),
    /// The route no longer accepts visits
    AlreadyFinished,
    Invalid { reason: String },
}

impl VisitOutcome {
    pub fn record(&self) -> Option<&VisitRecord> {
        match self {
            VisitOutcome::Completed(r) | VisitOutcome::Already(r) => Some(r),
            _ => None,
        }
    }

    fn invalid(reason: impl Into<String>) -> Self {
        VisitOutcome::Invalid {
            reason: reason.into(),
        }
    }
}

/// Whether every non-withdrawn visit is completed, plus the indexes still open
pub fn verify_that_route_is_completed(route: &OngoingRoute) -> (bool, Vec<usize>) {
    let pending = route.pending_visits();
    (pending.is_empty(), pending)
}

/// Random upper-case confirmation code shown to the buyer
pub fn confirmation_code(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(Uniform::new_inclusive(b'A', b'Z'))
        .take(length)
        .map(char::from)
        .collect()
}

/// Delivery side effects prepared before the record is written
struct DeliveryContext {
    buyer: UserContact,
    amount: Decimal,
    bags: u32,
}

impl RouteLifecycle {
    pub async fn handle_pickup(
        &self,
        route_id: &str,
        index: usize,
        calc_time: u64,
        meta: serde_json::Value,
    ) -> Result<VisitOutcome, LifecycleError> {
        self.complete_visit(route_id, index, VisitKind::Pickup, calc_time, meta)
            .await
    }

    pub async fn handle_delivery(
        &self,
        route_id: &str,
        index: usize,
        calc_time: u64,
        meta: serde_json::Value,
    ) -> Result<VisitOutcome, LifecycleError> {
        self.complete_visit(route_id, index, VisitKind::Delivery, calc_time, meta)
            .await
    }

    pub async fn handle_return(
        &self,
        route_id: &str,
        index: usize,
        calc_time: u64,
        meta: serde_json::Value,
    ) -> Result<VisitOutcome, LifecycleError> {
        self.complete_visit(route_id, index, VisitKind::Return, calc_time, meta)
            .await
    }

    /// Execute every pending visit of a route in order
    pub async fn complete_all_visits(
        &self,
        route_id: &str,
        calc_time: u64,
    ) -> Result<Vec<VisitOutcome>, LifecycleError> {
        let route = self.load_route(route_id).await?;
        let mut outcomes = Vec::new();
        for index in route.pending_visits() {
            let kind = route.route[index].visit.kind();
            let outcome = self
                .complete_visit(route_id, index, kind, calc_time, serde_json::Value::Null)
                .await?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    pub(crate) async fn load_route(&self, route_id: &str) -> Result<OngoingRoute, LifecycleError> {
        self.routes
            .get_ongoing_route(route_id)
            .await?
            .ok_or_else(|| LifecycleError::OngoingRouteNotFound(route_id.to_string()))
    }

    async fn complete_visit(
        &self,
        route_id: &str,
        index: usize,
        expected: VisitKind,
        calc_time: u64,
        meta: serde_json::Value,
    ) -> Result<VisitOutcome, LifecycleError> {
        let route = self.load_route(route_id).await?;

        let Some(entry) = route.route.get(index) else {
            return Ok(VisitOutcome::invalid(format!(
                "Visit index {index} out of range ({} visits)",
                route.route.len()
            )));
        };
        let visit = entry.visit.clone();
        if visit.kind() != expected {
            return Ok(VisitOutcome::invalid(format!(
                "Visit {index} is a {}, not a {expected}",
                visit.kind()
            )));
        }
        if let Err(e) = visit.validate() {
            warn!(route_id = %route_id, index, error = %e, "Invalid visit");
            self.routes
                .mark_visit(route_id, index, VisitedStatus::Invalid, None)
                .await?;
            return Ok(VisitOutcome::invalid(e.to_string()));
        }

        let key = VisitKey {
            drive_request: route.drive_request.clone(),
            ongoing_route: route.id.clone(),
            kind: visit.kind(),
            counterparty: visit.counterparty().to_string(),
        };
        if let Some(existing) = self.routes.find_visit_record(&key).await? {
            return self.already_recorded(&route, index, existing, calc_time).await;
        }

        if route.status != RouteStatus::Ongoing {
            debug!(route_id = %route_id, status = %route.status, "Route no longer ongoing");
            return Ok(VisitOutcome::AlreadyFinished);
        }
        if entry.visited_status == VisitedStatus::Withdrawn {
            return Ok(VisitOutcome::invalid(format!("Visit {index} was withdrawn")));
        }

        let delivery = self.delivery_context(&visit).await?;
        if visit.kind() == VisitKind::Delivery && delivery.is_none() {
            return Ok(VisitOutcome::invalid("Buyer user not found"));
        }

        let mut record = VisitRecord::new(
            format!("{}-{}", visit.kind(), Uuid::new_v4()),
            &route.id,
            index,
            visit.clone(),
            calc_time,
        )
        .with_meta(meta);
        if delivery.is_some() {
            // Stored with the record so a resumed settlement sends the same code
            record.code = Some(confirmation_code(self.config.confirmation_code_length));
        }

        let mut record = match self.routes.insert_visit_record(record).await? {
            InsertOutcome::Inserted(record) => record,
            InsertOutcome::Existing(existing) => {
                return self.already_recorded(&route, index, existing, calc_time).await;
            }
        };

        if let Some(ctx) = delivery {
            self.settle_delivery(&route, &visit, &mut record, ctx, calc_time)
                .await?;
        }

        self.complete_travel(&route, &visit).await?;

        let updated = self
            .routes
            .mark_visit(&route.id, index, VisitedStatus::Completed, Some(record.id.clone()))
            .await?;

        info!(
            route_id = %route.id,
            driver = %route.drive_request,
            index,
            kind = %visit.kind(),
            counterparty = %visit.counterparty(),
            "Visit completed"
        );

        self.finish_if_complete(&updated, calc_time).await?;
        Ok(VisitOutcome::Completed(record))
    }

    /// Buyer contact and price of a delivery. `None` for other visit kinds
    /// and for buyers without a user.
    async fn delivery_context(
        &self,
        visit: &Visit,
    ) -> Result<Option<DeliveryContext>, LifecycleError> {
        let Visit::Delivery {
            sell_request,
            buy_request,
            ..
        } = visit
        else {
            return Ok(None);
        };
        let Some(buyer) = self.graph.user_for_request(&buy_request.name).await? else {
            return Ok(None);
        };
        let price = match self.routes.county_price(&buy_request.location.county).await? {
            Some(price) => price,
            None => sell_request
                .price
                .unwrap_or(self.config.default_price_per_bag),
        };
        let bags = buy_request.current_requirement;
        Ok(Some(DeliveryContext {
            buyer,
            amount: price * Decimal::from(bags),
            bags,
        }))
    }

    async fn complete_travel(
        &self,
        route: &OngoingRoute,
        visit: &Visit,
    ) -> Result<(), LifecycleError> {
        let kind = match visit.kind() {
            VisitKind::Pickup => TravelKind::TravelToPickup,
            VisitKind::Delivery => TravelKind::TravelToDeliver,
            VisitKind::Return => return Ok(()),
        };
        let found = self
            .graph
            .set_travel_status(
                &route.drive_request,
                kind,
                visit.counterparty(),
                TravelStatus::Completed,
            )
            .await?;
        if !found {
            debug!(route_id = %route.id, counterparty = %visit.counterparty(), "No travel edge to complete");
        }
        Ok(())
    }

    /// Request payment from the buyer and send them the confirmation code.
    ///
    /// Safe to repeat: the gateway returns the first payment for the same
    /// reference and the code is taken from the record.
    async fn settle_delivery(
        &self,
        route: &OngoingRoute,
        visit: &Visit,
        record: &mut VisitRecord,
        ctx: DeliveryContext,
        calc_time: u64,
    ) -> Result<(), LifecycleError> {
        let code = record
            .code
            .clone()
            .unwrap_or_else(|| confirmation_code(self.config.confirmation_code_length));
        let reference = PaymentReference {
            drive_request: route.drive_request.clone(),
            ongoing_route: route.id.clone(),
            sell_request: visit.sell_request().name.clone(),
            buy_request: visit.buy_request().map(|b| b.name.clone()),
        };
        let payment_ref = self
            .payments
            .request_payment(
                ctx.amount,
                &ctx.buyer,
                &format!("Levering av {} vedsekker", ctx.bags),
                reference,
                calc_time,
            )
            .await?;

        record.code = Some(code.clone());
        record.payment_ref = Some(payment_ref);
        self.routes.update_visit_record(record).await?;

        let notification = Notification::new(
            ctx.buyer.email.clone(),
            ContentType::Delivery,
            NotificationStatus::New,
            format!("Veden er levert. Bekreft mottak med koden {code}"),
            calc_time,
        )
        .with_amount(ctx.bags)
        .with_reference(&record.id);
        if let Some(notification_id) = self.send(notification).await {
            record.notification = Some(notification_id);
            self.routes.update_visit_record(record).await?;
        }

        info!(
            route_id = %route.id,
            buyer = %ctx.buyer.name,
            amount = %ctx.amount,
            "Delivery payment requested"
        );
        Ok(())
    }

    /// Return the stored record, finishing whatever a previous call left
    /// undone: a delivery without a payment request, or a record that was
    /// written but never marked on the route
    async fn already_recorded(
        &self,
        route: &OngoingRoute,
        index: usize,
        mut existing: VisitRecord,
        calc_time: u64,
    ) -> Result<VisitOutcome, LifecycleError> {
        if existing.key.kind == VisitKind::Delivery && existing.payment_ref.is_none() {
            let visit = existing.visit.clone();
            match self.delivery_context(&visit).await? {
                Some(ctx) => {
                    warn!(
                        route_id = %route.id,
                        index = existing.index,
                        record_id = %existing.id,
                        "Delivery recorded without payment, resuming settlement"
                    );
                    self.settle_delivery(route, &visit, &mut existing, ctx, calc_time)
                        .await?;
                    self.complete_travel(route, &visit).await?;
                }
                None => {
                    return Ok(VisitOutcome::invalid("Buyer user not found"));
                }
            }
        }

        let marked = route
            .route
            .get(existing.index)
            .map_or(false, |rv| rv.visited.as_deref() == Some(existing.id.as_str()));
        if !marked && route.status == RouteStatus::Ongoing {
            warn!(
                route_id = %route.id,
                index = existing.index,
                "Visit recorded but not marked, repairing"
            );
            let updated = self
                .routes
                .mark_visit(
                    &route.id,
                    existing.index,
                    VisitedStatus::Completed,
                    Some(existing.id.clone()),
                )
                .await?;
            self.finish_if_complete(&updated, calc_time).await?;
        }
        debug!(route_id = %route.id, index, record_id = %existing.id, "Visit already recorded");
        Ok(VisitOutcome::Already(existing))
    }

    /// Run wrap-up once, on the call that moves the route out of `ongoing`
    async fn finish_if_complete(
        &self,
        route: &OngoingRoute,
        calc_time: u64,
    ) -> Result<(), LifecycleError> {
        let (complete, _) = verify_that_route_is_completed(route);
        if !complete {
            return Ok(());
        }
        let won = self
            .routes
            .transition_route_status(&route.id, RouteStatus::Ongoing, RouteStatus::Finished)
            .await?;
        if !won {
            debug!(route_id = %route.id, "Route already finishing");
            return Ok(());
        }

        info!(route_id = %route.id, driver = %route.drive_request, "All visits completed");
        if self
            .routes
            .delete_planned_route(&route.drive_request)
            .await?
            .is_some()
        {
            debug!(driver = %route.drive_request, "Removed lingering planned route");
        }
        self.wrap_up(&route.id, calc_time).await?;
        Ok(())
    }
}
