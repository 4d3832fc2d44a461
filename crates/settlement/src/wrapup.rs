use firewood_store::{BuyRequestUpdate, SellCounterDelta, StoreError};
use firewood_types::{
    BuyRequest, ClosedDeal, Company, ContentType, IncomingPayment, Notification, NotificationStatus,
    OngoingRoute, PaymentReference, PaymentStatus, Payout, PayoutTarget, Relationship,
    RelationshipKind, RouteStatus, Visit, VisitKind, VisitedStatus, WrapUpSummary,
};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{LifecycleError, RouteLifecycle};

const DRIVER_INVOICE_MESSAGE: &str = "Fullført kjøreoppdrag";

impl RouteLifecycle {
    /// Settle a finished route: close deals, release the driver, store the
    /// summary and request outgoing invoices.
    ///
    /// Only `finished` routes are wrapped up. With unpaid buyers and
    /// `require_paid_before_settlement` set, the route moves to
    /// `missing_payments` and the dues handler takes over.
    pub async fn wrap_up(
        &self,
        route_id: &str,
        calc_time: u64,
    ) -> Result<RouteStatus, LifecycleError> {
        let route = self.load_route(route_id).await?;
        if route.status != RouteStatus::Finished {
            debug!(route_id = %route_id, status = %route.status, "Route not ready for wrap-up");
            return Ok(route.status);
        }

        let incoming = self.payments.incoming_for_route(route_id).await?;
        let unpaid: Vec<IncomingPayment> = incoming
            .iter()
            .filter(|p| p.status == PaymentStatus::Unpaid)
            .cloned()
            .collect();

        if self.config.require_paid_before_settlement && !unpaid.is_empty() {
            let dues = due_indexes(&route, &unpaid);
            self.routes
                .transition_route_status(route_id, RouteStatus::Finished, RouteStatus::MissingPayments)
                .await?;
            self.routes.set_route_dues(route_id, dues.clone()).await?;
            warn!(route_id = %route_id, dues = ?dues, "Route has missing payments");

            let route = self.load_route(route_id).await?;
            self.dues.handle_dues(&route, &unpaid).await?;
            return Ok(RouteStatus::MissingPayments);
        }

        self.close_planned_deals(&route, &incoming, calc_time).await?;
        self.release_driver(&route.drive_request).await?;

        let summary_id = match self.routes.wrapup_for_route(route_id).await? {
            Some(existing) => existing.id,
            None => {
                let summary = summarize(&route, &incoming, calc_time);
                let id = summary.id.clone();
                self.routes.insert_wrapup(summary).await?;
                id
            }
        };

        self.invoice_outgoing(&route, calc_time).await?;

        if !route.dues.is_empty() {
            self.routes.set_route_dues(route_id, Vec::new()).await?;
        }
        self.routes
            .finalize_route(route_id, calc_time, Some(summary_id))
            .await?;
        self.routes
            .transition_route_status(route_id, RouteStatus::Finished, RouteStatus::AllDelivered)
            .await?;

        info!(
            route_id = %route_id,
            driver = %route.drive_request,
            deals = route.deals.len(),
            "Route wrapped up"
        );
        Ok(RouteStatus::AllDelivered)
    }

    /// Try again to wrap up a route held in `missing_payments`, or one whose
    /// wrap-up was interrupted
    pub async fn retry_wrap_up(
        &self,
        route_id: &str,
        calc_time: u64,
    ) -> Result<RouteStatus, LifecycleError> {
        let route = self.load_route(route_id).await?;
        match route.status {
            RouteStatus::MissingPayments => {
                self.routes
                    .transition_route_status(
                        route_id,
                        RouteStatus::MissingPayments,
                        RouteStatus::Finished,
                    )
                    .await?;
                self.wrap_up(route_id, calc_time).await
            }
            RouteStatus::Finished => self.wrap_up(route_id, calc_time).await,
            status => Ok(status),
        }
    }

    /// Settle every seller whose deliveries on this route are all done.
    ///
    /// A seller is closed at most once; completing more deliveries than were
    /// planned is an accounting error. Each step can be repeated after a
    /// failure: payouts are idempotent per reference, and a deal recorded but
    /// not yet rebalanced picks up at the rebalance.
    pub async fn close_planned_deals(
        &self,
        route: &OngoingRoute,
        incoming: &[IncomingPayment],
        calc_time: u64,
    ) -> Result<(), LifecycleError> {
        for (seller, deal) in &route.deals {
            let completed = route
                .route
                .iter()
                .filter(|rv| {
                    rv.visit.kind() == VisitKind::Delivery
                        && rv.visit.sell_request().name == *seller
                        && rv.visited_status == VisitedStatus::Completed
                })
                .count();
            let planned = deal.sells.len();

            if completed > planned {
                error!(route_id = %route.id, seller = %seller, completed, planned, "More deliveries than planned");
                return Err(LifecycleError::InvariantViolation(format!(
                    "{completed} completed deliveries for {seller}, {planned} planned"
                )));
            }
            if completed < planned {
                debug!(route_id = %route.id, seller = %seller, completed, planned, "Deal not complete");
                continue;
            }
            match route.completed_sell_requests.get(seller) {
                Some(closed) if closed.rebalanced => {
                    debug!(route_id = %route.id, seller = %seller, "Deal already closed");
                    continue;
                }
                Some(_) => {
                    warn!(route_id = %route.id, seller = %seller, "Deal closed but not rebalanced, resuming");
                }
                None => {
                    self.settle_deal(route, seller, deal.number_of_bags_sold, incoming, calc_time)
                        .await?;
                }
            }

            self.rebalance_after_deal(
                &route.id,
                seller,
                &deal.sells,
                deal.number_of_bags_sold,
                calc_time,
            )
            .await?;
            self.routes.mark_deal_rebalanced(&route.id, seller).await?;

            info!(
                route_id = %route.id,
                seller = %seller,
                bags = deal.number_of_bags_sold,
                "Deal closed"
            );
        }
        Ok(())
    }

    /// Pay seller, driver and operator, then record the deal as closed
    async fn settle_deal(
        &self,
        route: &OngoingRoute,
        seller: &str,
        bags_sold: u32,
        incoming: &[IncomingPayment],
        calc_time: u64,
    ) -> Result<(), LifecycleError> {
        let amount: Decimal = incoming
            .iter()
            .filter(|p| p.reference.sell_request == *seller)
            .map(|p| p.amount)
            .sum();
        let seller_user = self
            .graph
            .user_for_request(seller)
            .await?
            .ok_or_else(|| LifecycleError::missing("seller user", seller))?;
        let driver_user = self
            .graph
            .user_for_request(&route.drive_request)
            .await?
            .ok_or_else(|| LifecycleError::missing("driver user", route.drive_request.as_str()))?;

        let reference = PaymentReference {
            drive_request: route.drive_request.clone(),
            ongoing_route: route.id.clone(),
            sell_request: seller.to_string(),
            buy_request: None,
        };
        let message = format!("Betaling for {bags_sold} vedsekker");
        let (seller_payment_ref, driver_payment_ref) = self
            .payments
            .pay_seller_and_driver(
                amount,
                &seller_user,
                &driver_user,
                &message,
                reference.clone(),
                calc_time,
            )
            .await?;
        let operator_share = self.payments.split().operator_share(amount);
        self.payments
            .pay_operator(operator_share, &message, reference, calc_time)
            .await?;

        self.routes
            .record_closed_deal(
                &route.id,
                seller,
                ClosedDeal {
                    seller_payment_ref,
                    driver_payment_ref,
                    closed_at: calc_time,
                    rebalanced: false,
                },
            )
            .await
            .map_err(|e| match e {
                StoreError::DuplicateId(_) => LifecycleError::InvariantViolation(format!(
                    "deal for {seller} on route {} closed twice",
                    route.id
                )),
                other => LifecycleError::Store(other),
            })?;

        info!(
            route_id = %route.id,
            seller = %seller,
            bags = bags_sold,
            %amount,
            "Deal settled"
        );
        Ok(())
    }

    /// Release the buyers of a closed deal and shrink the seller's stock.
    ///
    /// The seller delta is worked out before anything is released and is
    /// applied at most once per route and seller. Buyer updates are absolute
    /// values taken from the planned deal, so repeating them is harmless.
    async fn rebalance_after_deal(
        &self,
        route_id: &str,
        seller: &str,
        buyers: &[BuyRequest],
        bags_sold: u32,
        calc_time: u64,
    ) -> Result<(), LifecycleError> {
        let mut delta = SellCounterDelta {
            current_capacity: -i64::from(bags_sold),
            prepare_for_pickup: -i64::from(bags_sold),
            ..Default::default()
        };
        let mut updates = Vec::with_capacity(buyers.len());

        for sold in buyers {
            let buyer = self
                .graph
                .get_buy_request(&sold.name)
                .await?
                .ok_or_else(|| LifecycleError::missing("buyRequest", sold.name.as_str()))?;
            let mut update = BuyRequestUpdate::default()
                .last_calced(calc_time)
                .claimed_by_driver(false);

            if sold.is_reserving() && sold.reserve_target.as_deref() == Some(seller) {
                let weeks = sold.reserved_weeks - 1;
                delta.amount_reserved -= i64::from(sold.current_requirement);
                update = update.reserved_weeks(weeks);
                if weeks == 0 {
                    delta.num_reserved -= 1;
                    update = update.reserve_target(None);
                }
            } else if let Some(Relationship::StagedSell(edge)) = self
                .graph
                .get_relationship(RelationshipKind::StagedSell, &buyer.name)
                .await?
            {
                if edge.sell_request == seller {
                    delta.amount_staged -= i64::from(edge.staged);
                    delta.num_staged -= 1;
                }
            } else if self
                .graph
                .get_relationship(RelationshipKind::Reservation, &buyer.name)
                .await?
                .is_some()
            {
                warn!(seller = %seller, buyer = %buyer.name, "Reservation edge without reservation weeks");
            }
            updates.push((buyer.name, update));
        }

        let key = format!("deal/{route_id}/{seller}");
        match self.graph.update_sell_counters_once(seller, &key, delta).await? {
            Some(updated) => debug!(
                seller = %seller,
                capacity = updated.current_capacity,
                reserved = updated.amount_reserved,
                staged = updated.amount_staged,
                "Seller stock rebalanced"
            ),
            None => debug!(seller = %seller, route_id = %route_id, "Seller stock already rebalanced"),
        }

        for (buyer, update) in updates {
            self.graph
                .delete_relationship(RelationshipKind::Reservation, &buyer)
                .await?;
            self.graph
                .delete_relationship(RelationshipKind::StagedSell, &buyer)
                .await?;
            self.graph.update_buy_request(&buyer, update).await?;
        }
        Ok(())
    }

    /// One invoice per seller payout and one for all open driver payouts,
    /// each addressed to the operator
    async fn invoice_outgoing(
        &self,
        route: &OngoingRoute,
        calc_time: u64,
    ) -> Result<(), LifecycleError> {
        let operator = self.config.operator.clone();

        let sellers = self
            .payments
            .payouts_for_route(&route.id, PayoutTarget::Seller, None)
            .await?;
        for payout in sellers.iter().filter(|p| p.invoice_id.is_none()) {
            let company = self.company_for(payout).await?;
            self.invoice_payouts(
                &company,
                &operator,
                std::slice::from_ref(payout),
                &payout.message,
                calc_time,
            )
            .await?;
        }

        let drivers: Vec<Payout> = self
            .payments
            .payouts_for_route(&route.id, PayoutTarget::Driver, Some(PaymentStatus::Unpaid))
            .await?
            .into_iter()
            .filter(|p| p.invoice_id.is_none())
            .collect();
        if let Some(first) = drivers.first() {
            let company = self.company_for(first).await?;
            self.invoice_payouts(&company, &operator, &drivers, DRIVER_INVOICE_MESSAGE, calc_time)
                .await?;
        }
        Ok(())
    }

    async fn company_for(&self, payout: &Payout) -> Result<Company, LifecycleError> {
        self.routes
            .find_company(&payout.payee.email, payout.payee.phone.as_deref())
            .await?
            .ok_or_else(|| LifecycleError::missing("company", payout.payee.name.as_str()))
    }

    async fn invoice_payouts(
        &self,
        from: &Company,
        to: &Company,
        payouts: &[Payout],
        message: &str,
        calc_time: u64,
    ) -> Result<(), LifecycleError> {
        let amount: Decimal = payouts.iter().map(|p| p.amount).sum();
        let invoice = self
            .invoices
            .create_invoice(from, to, amount, message, calc_time)
            .await?;
        for payout in payouts {
            self.payments.attach_invoice(&payout.id, &invoice.id).await?;
        }

        let notification = Notification::new(
            to.email.clone(),
            ContentType::IncomingInvoice,
            NotificationStatus::New,
            format!("Faktura fra {}: {}", from.name, invoice.filename),
            calc_time,
        )
        .with_reference(&invoice.id);
        self.send(notification).await;

        info!(
            invoice_id = %invoice.id,
            from = %from.name,
            payouts = payouts.len(),
            %amount,
            "Outgoing invoice requested"
        );
        Ok(())
    }
}

/// Delivery indexes whose buyer still owes money
fn due_indexes(route: &OngoingRoute, unpaid: &[IncomingPayment]) -> Vec<usize> {
    route
        .route
        .iter()
        .enumerate()
        .filter_map(|(i, rv)| match &rv.visit {
            Visit::Delivery { buy_request, .. }
                if unpaid
                    .iter()
                    .any(|p| p.reference.buy_request.as_deref() == Some(buy_request.name.as_str())) =>
            {
                Some(i)
            }
            _ => None,
        })
        .collect()
}

fn summarize(route: &OngoingRoute, incoming: &[IncomingPayment], calc_time: u64) -> WrapUpSummary {
    let ended = route.finished_time.unwrap_or(calc_time);
    WrapUpSummary {
        id: format!("wrapup-{}", Uuid::new_v4()),
        ongoing_route: route.id.clone(),
        drive_request: route.drive_request.clone(),
        total_income_from_sales_paid: incoming
            .iter()
            .filter(|p| p.status == PaymentStatus::Paid)
            .map(|p| p.amount)
            .sum(),
        number_of_deliveries: route.count(VisitKind::Delivery),
        number_of_pickups: route.count(VisitKind::Pickup),
        total_distance: route.total_distance(),
        began: route.created_at,
        ended,
        duration_secs: ended.saturating_sub(route.created_at),
        calc_time,
    }
}
