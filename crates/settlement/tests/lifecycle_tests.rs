//! Route lifecycle tests against in-memory collaborators

use async_trait::async_trait;
use firewood_settlement::{
    DuesHandler, InMemoryInvoiceService, InMemoryNotifier, InvoiceTerms, LedgerPaymentGateway,
    LifecycleConfig, LifecycleError, NotificationError, Notifier, PaymentError, PaymentGateway,
    PaymentSplit, PlanOutcome, RouteLifecycle, VisitOutcome,
};
use firewood_store::{
    GraphStore, InMemoryGraphStore, InMemoryRouteStore, RouteStore, UpsertOutcome,
};
use firewood_types::{
    BuyRequest, Company, ContentType, DriveRequest, IncomingPayment, Location, Notification,
    NotificationStatus, OngoingRoute, PaymentReference, PaymentStatus, Payout, PayoutTarget,
    PlannedRoute, Relationship, RelationshipKind, Reservation, RouteStatus, SellRequest,
    StagedSell, UserContact, Visit, VisitHeader, VisitedStatus,
};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};

const NOW: u64 = 1_700_000_000;

// ═══════════════════════════════════════════════════════════════════════════
// FIXTURES
// ═══════════════════════════════════════════════════════════════════════════

struct Fixture {
    graph: InMemoryGraphStore,
    routes: InMemoryRouteStore,
    payments: LedgerPaymentGateway,
    invoices: InMemoryInvoiceService,
    notifier: InMemoryNotifier,
    lifecycle: RouteLifecycle,
}

fn loc(name: &str, lat: f64) -> Location {
    Location::new(name, lat, 10.2, "3185", "Vestfold")
}

fn create_test_company(name: &str, email: &str) -> Company {
    Company {
        name: name.to_string(),
        companynum: format!("9{}", name.len()),
        address: "Skogveien 1, 3185 Skoppum".to_string(),
        email: email.to_string(),
        phone: None,
        account_number: None,
    }
}

fn create_test_seller() -> SellRequest {
    let mut seller = SellRequest::new("s1", loc("yard", 59.40), 20);
    seller.amount_staged = 5;
    seller.num_staged = 2;
    seller
}

fn create_test_buyers() -> (BuyRequest, BuyRequest) {
    (
        BuyRequest::new("b1", loc("b1-home", 59.42), 2),
        BuyRequest::new("b2", loc("b2-home", 59.50), 3),
    )
}

fn header(from: &Location, to: &Location, before: u32, after: u32) -> VisitHeader {
    VisitHeader {
        from: from.clone(),
        to: to.clone(),
        distance: 5.0,
        drive_request: "d1".to_string(),
        loaded_before: before,
        loaded_after: after,
    }
}

/// Pickup at s1 followed by deliveries to b1 (2 bags) and b2 (3 bags)
fn create_test_route() -> Vec<Visit> {
    let seller = create_test_seller();
    let (b1, b2) = create_test_buyers();
    let home = loc("d1-home", 59.30);
    vec![
        Visit::pickup(header(&home, &seller.location, 0, 5), seller.clone()).unwrap(),
        Visit::delivery(header(&seller.location, &b1.location, 5, 3), seller.clone(), b1.clone())
            .unwrap(),
        Visit::delivery(header(&b1.location, &b2.location, 3, 0), seller, b2).unwrap(),
    ]
}

async fn create_test_fixture(config: LifecycleConfig) -> Fixture {
    let graph = InMemoryGraphStore::new();
    let routes = InMemoryRouteStore::new();

    graph.insert_sell_request(create_test_seller()).await;
    let (b1, b2) = create_test_buyers();
    for buyer in [b1, b2] {
        graph
            .create_relationship(Relationship::StagedSell(StagedSell {
                buy_request: buyer.name.clone(),
                sell_request: "s1".to_string(),
                county: "Vestfold".to_string(),
                calc_time: NOW - 100,
                staged: buyer.current_requirement,
            }))
            .await
            .unwrap();
        graph.insert_buy_request(buyer).await;
    }
    graph
        .insert_drive_request(DriveRequest::new("d1", loc("d1-home", 59.30)))
        .await;

    graph
        .insert_user("s1", UserContact::new("Sara Selger", "sara@example.no"))
        .await;
    graph
        .insert_user("b1", UserContact::new("Bjørn Kjøper", "bjorn@example.no"))
        .await;
    graph
        .insert_user("b2", UserContact::new("Berit Kjøper", "berit@example.no"))
        .await;
    graph
        .insert_user("d1", UserContact::new("Dag Sjåfør", "dag@example.no"))
        .await;

    routes
        .insert_company(create_test_company("Saras Ved", "sara@example.no"))
        .await;
    routes
        .insert_company(create_test_company("Dags Transport", "dag@example.no"))
        .await;
    routes
        .set_county_price("Vestfold", Decimal::new(200, 0))
        .await;

    let payments = LedgerPaymentGateway::new(
        PaymentSplit::default(),
        UserContact::new("VEDBJØRN AS", "regninger@vedbjorn.no"),
    );
    let invoices = InMemoryInvoiceService::new(InvoiceTerms::default());
    let notifier = InMemoryNotifier::new();

    let lifecycle = RouteLifecycle::new(
        Arc::new(graph.clone()),
        Arc::new(routes.clone()),
        Arc::new(payments.clone()),
        Arc::new(invoices.clone()),
        Arc::new(notifier.clone()),
        config,
    );

    Fixture {
        graph,
        routes,
        payments,
        invoices,
        notifier,
        lifecycle,
    }
}

async fn create_claimed_route(fx: &Fixture) -> OngoingRoute {
    fx.lifecycle
        .overwrite_planned_route("d1", create_test_route(), NOW)
        .await
        .unwrap();
    fx.lifecycle.claim_planned_route("d1", NOW + 60).await.unwrap()
}

#[derive(Default)]
struct MockDuesHandler {
    calls: Arc<Mutex<Vec<(String, usize)>>>,
    should_fail: bool,
}

#[async_trait]
impl DuesHandler for MockDuesHandler {
    async fn handle_dues(
        &self,
        route: &OngoingRoute,
        dues: &[IncomingPayment],
    ) -> Result<(), LifecycleError> {
        if self.should_fail {
            return Err(LifecycleError::InvariantViolation("mock failure".to_string()));
        }
        self.calls
            .lock()
            .unwrap()
            .push((route.id.clone(), dues.len()));
        Ok(())
    }
}

/// Notifier whose channel can be taken down
#[derive(Clone, Default)]
struct MockNotifier {
    inner: InMemoryNotifier,
    should_fail: Arc<Mutex<bool>>,
}

impl MockNotifier {
    fn failing() -> Self {
        let notifier = Self::default();
        *notifier.should_fail.lock().unwrap() = true;
        notifier
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn notify(&self, notification: Notification) -> Result<String, NotificationError> {
        if *self.should_fail.lock().unwrap() {
            return Err(NotificationError::Unavailable("mock outage".to_string()));
        }
        self.inner.notify(notification).await
    }
}

/// Ledger gateway that fails the next `n` calls of selected operations
#[derive(Clone)]
struct MockPaymentGateway {
    inner: LedgerPaymentGateway,
    fail_request_payment: Arc<Mutex<u32>>,
    fail_pay_operator: Arc<Mutex<u32>>,
}

impl MockPaymentGateway {
    fn new(inner: LedgerPaymentGateway) -> Self {
        Self {
            inner,
            fail_request_payment: Arc::new(Mutex::new(0)),
            fail_pay_operator: Arc::new(Mutex::new(0)),
        }
    }
}

fn take_failure(counter: &Mutex<u32>) -> Result<(), PaymentError> {
    let mut remaining = counter.lock().unwrap();
    if *remaining > 0 {
        *remaining -= 1;
        return Err(PaymentError::Unavailable("mock failure".to_string()));
    }
    Ok(())
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    fn split(&self) -> PaymentSplit {
        self.inner.split()
    }

    async fn request_payment(
        &self,
        amount: Decimal,
        payer: &UserContact,
        message: &str,
        reference: PaymentReference,
        calc_time: u64,
    ) -> Result<String, PaymentError> {
        take_failure(&self.fail_request_payment)?;
        self.inner
            .request_payment(amount, payer, message, reference, calc_time)
            .await
    }

    async fn pay_seller_and_driver(
        &self,
        amount: Decimal,
        seller: &UserContact,
        driver: &UserContact,
        message: &str,
        reference: PaymentReference,
        calc_time: u64,
    ) -> Result<(String, String), PaymentError> {
        self.inner
            .pay_seller_and_driver(amount, seller, driver, message, reference, calc_time)
            .await
    }

    async fn pay_operator(
        &self,
        amount: Decimal,
        message: &str,
        reference: PaymentReference,
        calc_time: u64,
    ) -> Result<String, PaymentError> {
        take_failure(&self.fail_pay_operator)?;
        self.inner
            .pay_operator(amount, message, reference, calc_time)
            .await
    }

    async fn incoming_for_route(
        &self,
        route_id: &str,
    ) -> Result<Vec<IncomingPayment>, PaymentError> {
        self.inner.incoming_for_route(route_id).await
    }

    async fn payouts_for_route(
        &self,
        route_id: &str,
        target: PayoutTarget,
        status: Option<PaymentStatus>,
    ) -> Result<Vec<Payout>, PaymentError> {
        self.inner.payouts_for_route(route_id, target, status).await
    }

    async fn attach_invoice(&self, payout_id: &str, invoice_id: &str) -> Result<(), PaymentError> {
        self.inner.attach_invoice(payout_id, invoice_id).await
    }

    async fn mark_incoming_paid(&self, payment_id: &str) -> Result<(), PaymentError> {
        self.inner.mark_incoming_paid(payment_id).await
    }
}

/// Lifecycle over the fixture's stores with other payment and notifier
/// collaborators
fn create_test_lifecycle(
    fx: &Fixture,
    payments: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
) -> RouteLifecycle {
    RouteLifecycle::new(
        Arc::new(fx.graph.clone()),
        Arc::new(fx.routes.clone()),
        payments,
        Arc::new(fx.invoices.clone()),
        notifier,
        LifecycleConfig::default(),
    )
}

fn count_payouts(payouts: &[Payout], target: PayoutTarget) -> usize {
    payouts.iter().filter(|p| p.target == target).count()
}

// ═══════════════════════════════════════════════════════════════════════════
// PLANNING
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_overwrite_notifies_only_on_create() {
    let fx = create_test_fixture(LifecycleConfig::default()).await;

    let first = fx
        .lifecycle
        .overwrite_planned_route("d1", create_test_route(), NOW)
        .await
        .unwrap();
    let second = fx
        .lifecycle
        .overwrite_planned_route("d1", create_test_route(), NOW + 10)
        .await
        .unwrap();

    assert_eq!(first, PlanOutcome::Created);
    assert_eq!(second, PlanOutcome::Replaced);
    assert_eq!(fx.notifier.count(ContentType::NewAssignment).await, 1);

    let planned = fx.routes.get_planned_route("d1").await.unwrap().unwrap();
    assert_eq!(planned.created_at, NOW);
    assert_eq!(planned.updated_at, Some(NOW + 10));
    assert_eq!(planned.deals["s1"].number_of_bags_sold, 5);
}

#[tokio::test]
async fn test_decline_releases_driver() {
    let fx = create_test_fixture(LifecycleConfig::default()).await;
    fx.lifecycle
        .overwrite_planned_route("d1", create_test_route(), NOW)
        .await
        .unwrap();
    fx.graph.set_driver_availability("d1", false, 0).await.unwrap();

    fx.lifecycle.decline_planned_route("d1").await.unwrap();

    assert!(fx.routes.get_planned_route("d1").await.unwrap().is_none());
    let driver = fx.graph.get_drive_request("d1").await.unwrap().unwrap();
    assert!(driver.available);

    assert!(matches!(
        fx.lifecycle.decline_planned_route("d1").await,
        Err(LifecycleError::PlannedRouteNotFound(_))
    ));
}

// ═══════════════════════════════════════════════════════════════════════════
// CLAIM
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_claim_locks_buyers_and_prepares_pickup() {
    let fx = create_test_fixture(LifecycleConfig::default()).await;
    let route = create_claimed_route(&fx).await;

    assert_eq!(route.status, RouteStatus::Ongoing);
    assert_eq!(route.due, NOW + 60 + 172_800);
    assert!(fx.routes.get_planned_route("d1").await.unwrap().is_none());

    let driver = fx.graph.get_drive_request("d1").await.unwrap().unwrap();
    assert!(!driver.available);
    for name in ["b1", "b2"] {
        let buyer = fx.graph.get_buy_request(name).await.unwrap().unwrap();
        assert!(buyer.claimed_by_driver);
    }
    let seller = fx.graph.get_sell_request("s1").await.unwrap().unwrap();
    assert_eq!(seller.prepare_for_pickup, 5);

    let to_seller = fx.notifier.sent_to("sara@example.no").await;
    assert!(to_seller
        .iter()
        .any(|n| n.content_type == ContentType::Pickup && n.amount == Some(5)));
    let requested: Vec<_> = fx
        .notifier
        .sent()
        .await
        .into_iter()
        .filter(|(_, n)| {
            n.content_type == ContentType::Delivery && n.status == NotificationStatus::Requested
        })
        .collect();
    assert_eq!(requested.len(), 2);
}

#[tokio::test]
async fn test_second_claim_is_rejected() {
    let fx = create_test_fixture(LifecycleConfig::default()).await;
    let route = create_claimed_route(&fx).await;

    // No plan can be stored for a driver mid-route, so nothing is left to claim
    let outcome = fx
        .routes
        .upsert_planned_route(PlannedRoute::new("d1", create_test_route(), NOW + 100))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        UpsertOutcome::DriverBusy {
            ongoing_route: route.id
        }
    );
    assert!(fx.routes.get_planned_route("d1").await.unwrap().is_none());

    let result = fx.lifecycle.claim_planned_route("d1", NOW + 120).await;
    assert!(matches!(result, Err(LifecycleError::PlannedRouteNotFound(_))));
    assert_eq!(fx.routes.ongoing_routes().await.len(), 1);
}

#[tokio::test]
async fn test_claim_completes_during_notifier_outage() {
    let fx = create_test_fixture(LifecycleConfig::default()).await;
    let notifier = MockNotifier::failing();
    let lifecycle =
        create_test_lifecycle(&fx, Arc::new(fx.payments.clone()), Arc::new(notifier.clone()));

    let outcome = lifecycle
        .overwrite_planned_route("d1", create_test_route(), NOW)
        .await
        .unwrap();
    assert_eq!(outcome, PlanOutcome::Created);

    let route = lifecycle.claim_planned_route("d1", NOW + 60).await.unwrap();
    assert_eq!(route.status, RouteStatus::Ongoing);

    // Every buyer is locked and the plan is gone even though no message went out
    for name in ["b1", "b2"] {
        let buyer = fx.graph.get_buy_request(name).await.unwrap().unwrap();
        assert!(buyer.claimed_by_driver);
    }
    let seller = fx.graph.get_sell_request("s1").await.unwrap().unwrap();
    assert_eq!(seller.prepare_for_pickup, 5);
    let driver = fx.graph.get_drive_request("d1").await.unwrap().unwrap();
    assert!(!driver.available);
    assert!(fx.routes.get_planned_route("d1").await.unwrap().is_none());
    assert!(notifier.inner.sent().await.is_empty());

    // The route runs to wrap-up with the channel still down
    lifecycle
        .complete_all_visits(&route.id, NOW + 3600)
        .await
        .unwrap();
    let done = fx.routes.get_ongoing_route(&route.id).await.unwrap().unwrap();
    assert_eq!(done.status, RouteStatus::AllDelivered);
    assert_eq!(fx.invoices.invoices().await.len(), 2);

    let records = fx.routes.visit_records_for_route(&route.id).await.unwrap();
    let delivery = records.iter().find(|r| r.index == 1).unwrap();
    assert!(delivery.payment_ref.is_some());
    assert!(delivery.notification.is_none());
}

#[tokio::test]
async fn test_plan_rejected_while_route_ongoing() {
    let fx = create_test_fixture(LifecycleConfig::default()).await;
    let route = create_claimed_route(&fx).await;
    fx.graph.set_driver_availability("d1", true, 0).await.unwrap();

    let outcome = fx
        .lifecycle
        .overwrite_planned_route("d1", create_test_route(), NOW + 200)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        PlanOutcome::Rejected {
            ongoing_route: route.id
        }
    );
    assert!(fx.routes.get_planned_route("d1").await.unwrap().is_none());
    let driver = fx.graph.get_drive_request("d1").await.unwrap().unwrap();
    assert!(!driver.available);
}

#[tokio::test]
async fn test_claim_without_plan_fails() {
    let fx = create_test_fixture(LifecycleConfig::default()).await;
    assert!(matches!(
        fx.lifecycle.claim_planned_route("d1", NOW).await,
        Err(LifecycleError::PlannedRouteNotFound(_))
    ));
}

// ═══════════════════════════════════════════════════════════════════════════
// VISITS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_redelivery_is_idempotent() {
    let fx = create_test_fixture(LifecycleConfig::default()).await;
    let route = create_claimed_route(&fx).await;
    let meta = serde_json::json!({ "photo": "delivery-1.jpg" });

    fx.lifecycle
        .handle_pickup(&route.id, 0, NOW + 100, serde_json::Value::Null)
        .await
        .unwrap();
    let first = fx
        .lifecycle
        .handle_delivery(&route.id, 1, NOW + 200, meta.clone())
        .await
        .unwrap();
    let second = fx
        .lifecycle
        .handle_delivery(&route.id, 1, NOW + 300, meta)
        .await
        .unwrap();

    let VisitOutcome::Completed(record) = first else {
        panic!("expected completed, got {first:?}");
    };
    assert_eq!(second, VisitOutcome::Already(record.clone()));

    let code = record.code.clone().unwrap();
    assert_eq!(code.len(), 4);
    assert!(code.chars().all(|c| c.is_ascii_uppercase()));
    assert!(record.payment_ref.is_some());
    assert_eq!(record.meta["photo"], "delivery-1.jpg");

    // 2 bags at the county price of 200
    let incoming = fx.payments.incoming_for_route(&route.id).await.unwrap();
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].amount, Decimal::new(400, 0));

    let approvals: Vec<_> = fx
        .notifier
        .sent_to("bjorn@example.no")
        .await
        .into_iter()
        .filter(|n| n.status == NotificationStatus::New)
        .collect();
    assert_eq!(approvals.len(), 1);
    assert!(approvals[0].text.contains(&code));

    let stored = fx.routes.get_ongoing_route(&route.id).await.unwrap().unwrap();
    assert_eq!(stored.route[1].visited_status, VisitedStatus::Completed);
    assert_eq!(stored.route[1].visited.as_deref(), Some(record.id.as_str()));
}

#[tokio::test]
async fn test_delivery_resumes_after_payment_failure() {
    let fx = create_test_fixture(LifecycleConfig::default()).await;
    let gateway = MockPaymentGateway::new(fx.payments.clone());
    *gateway.fail_request_payment.lock().unwrap() = 1;
    let lifecycle =
        create_test_lifecycle(&fx, Arc::new(gateway.clone()), Arc::new(fx.notifier.clone()));

    lifecycle
        .overwrite_planned_route("d1", create_test_route(), NOW)
        .await
        .unwrap();
    let route = lifecycle.claim_planned_route("d1", NOW + 60).await.unwrap();
    lifecycle
        .handle_pickup(&route.id, 0, NOW + 100, serde_json::Value::Null)
        .await
        .unwrap();

    let failed = lifecycle
        .handle_delivery(&route.id, 1, NOW + 200, serde_json::Value::Null)
        .await;
    assert!(matches!(failed, Err(LifecycleError::Payment(_))));

    let records = fx.routes.visit_records_for_route(&route.id).await.unwrap();
    assert_eq!(records.len(), 2);
    let pending = records.iter().find(|r| r.index == 1).unwrap().clone();
    assert!(pending.payment_ref.is_none());
    let code = pending.code.clone().unwrap();

    let retried = lifecycle
        .handle_delivery(&route.id, 1, NOW + 300, serde_json::Value::Null)
        .await
        .unwrap();
    let VisitOutcome::Already(record) = retried else {
        panic!("expected already, got {retried:?}");
    };
    assert_eq!(record.id, pending.id);
    assert!(record.payment_ref.is_some());
    assert_eq!(record.code.as_deref(), Some(code.as_str()));

    let incoming = fx.payments.incoming_for_route(&route.id).await.unwrap();
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].amount, Decimal::new(400, 0));

    let stored = fx.routes.get_ongoing_route(&route.id).await.unwrap().unwrap();
    assert_eq!(stored.route[1].visited_status, VisitedStatus::Completed);
    assert_eq!(stored.route[1].visited.as_deref(), Some(record.id.as_str()));

    // A further call changes nothing
    let again = lifecycle
        .handle_delivery(&route.id, 1, NOW + 400, serde_json::Value::Null)
        .await
        .unwrap();
    assert_eq!(again, VisitOutcome::Already(record));
    assert_eq!(fx.payments.incoming_for_route(&route.id).await.unwrap().len(), 1);

    let approvals: Vec<_> = fx
        .notifier
        .sent_to("bjorn@example.no")
        .await
        .into_iter()
        .filter(|n| n.status == NotificationStatus::New)
        .collect();
    assert_eq!(approvals.len(), 1);
    assert!(approvals[0].text.contains(&code));
}

#[tokio::test]
async fn test_wrong_visit_kind_is_invalid() {
    let fx = create_test_fixture(LifecycleConfig::default()).await;
    let route = create_claimed_route(&fx).await;

    let outcome = fx
        .lifecycle
        .handle_pickup(&route.id, 1, NOW, serde_json::Value::Null)
        .await
        .unwrap();
    assert!(matches!(outcome, VisitOutcome::Invalid { .. }));

    let out_of_range = fx
        .lifecycle
        .handle_delivery(&route.id, 9, NOW, serde_json::Value::Null)
        .await
        .unwrap();
    assert!(matches!(out_of_range, VisitOutcome::Invalid { .. }));

    let stored = fx.routes.get_ongoing_route(&route.id).await.unwrap().unwrap();
    assert_eq!(stored.route[1].visited_status, VisitedStatus::Pending);
}

#[tokio::test]
async fn test_malformed_visit_marked_invalid() {
    let fx = create_test_fixture(LifecycleConfig::default()).await;
    let seller = create_test_seller();
    let (b1, _) = create_test_buyers();
    let home = loc("d1-home", 59.30);

    // Cargo does not drop by the buyer's requirement
    let broken = Visit::Delivery {
        header: header(&seller.location, &b1.location, 2, 2),
        sell_request: seller.clone(),
        buy_request: b1,
    };
    let route = vec![
        Visit::pickup(header(&home, &seller.location, 0, 2), seller).unwrap(),
        broken,
    ];
    fx.routes
        .upsert_planned_route(PlannedRoute::new("d1", route, NOW))
        .await
        .unwrap();
    let ongoing = fx.lifecycle.claim_planned_route("d1", NOW).await.unwrap();

    let outcome = fx
        .lifecycle
        .handle_delivery(&ongoing.id, 1, NOW, serde_json::Value::Null)
        .await
        .unwrap();

    let VisitOutcome::Invalid { reason } = outcome else {
        panic!("expected invalid");
    };
    assert!(reason.contains("cargo mismatch"));
    let stored = fx.routes.get_ongoing_route(&ongoing.id).await.unwrap().unwrap();
    assert_eq!(stored.route[1].visited_status, VisitedStatus::Invalid);
    assert!(fx.payments.incoming().await.is_empty());
}

#[tokio::test]
async fn test_missing_buyer_user_is_invalid() {
    let fx = create_test_fixture(LifecycleConfig::default()).await;
    let route = create_claimed_route(&fx).await;

    let orphan = InMemoryGraphStore::new();
    let lifecycle = RouteLifecycle::new(
        Arc::new(orphan),
        Arc::new(fx.routes.clone()),
        Arc::new(fx.payments.clone()),
        Arc::new(fx.invoices.clone()),
        Arc::new(fx.notifier.clone()),
        LifecycleConfig::default(),
    );

    let outcome = lifecycle
        .handle_delivery(&route.id, 1, NOW, serde_json::Value::Null)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        VisitOutcome::Invalid {
            reason: "Buyer user not found".to_string()
        }
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// WRAP-UP
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_full_route_wraps_up_once() {
    let fx = create_test_fixture(LifecycleConfig::default()).await;
    let route = create_claimed_route(&fx).await;

    let outcomes = fx
        .lifecycle
        .complete_all_visits(&route.id, NOW + 3600)
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, VisitOutcome::Completed(_))));

    let done = fx.routes.get_ongoing_route(&route.id).await.unwrap().unwrap();
    assert_eq!(done.status, RouteStatus::AllDelivered);
    assert!(done.completed_sell_requests.contains_key("s1"));
    assert!(done.wrapup.is_some());

    // Capacity shrinks by the 5 bags sold and the staged sales are released
    let seller = fx.graph.get_sell_request("s1").await.unwrap().unwrap();
    assert_eq!(seller.current_capacity, 15);
    assert_eq!(seller.amount_staged, 0);
    assert_eq!(seller.num_staged, 0);
    assert_eq!(seller.prepare_for_pickup, 0);

    for name in ["b1", "b2"] {
        let buyer = fx.graph.get_buy_request(name).await.unwrap().unwrap();
        assert!(!buyer.claimed_by_driver);
        assert_eq!(buyer.last_calced, NOW + 3600);
    }
    assert!(fx
        .graph
        .relationships(RelationshipKind::StagedSell)
        .await
        .is_empty());

    let driver = fx.graph.get_drive_request("d1").await.unwrap().unwrap();
    assert!(driver.available);
    assert!(fx.graph.travels_for_driver("d1").await.unwrap().is_empty());

    // 5 bags at 200: driver 20%, operator 5%, seller the rest
    let payouts = fx.payments.payouts().await;
    let total = |target| -> Decimal {
        payouts
            .iter()
            .filter(|p| p.target == target)
            .map(|p| p.amount)
            .sum()
    };
    assert_eq!(total(PayoutTarget::Seller), Decimal::new(750, 0));
    assert_eq!(total(PayoutTarget::Driver), Decimal::new(200, 0));
    assert_eq!(total(PayoutTarget::Operator), Decimal::new(50, 0));

    let invoices = fx.invoices.invoices().await;
    assert_eq!(invoices.len(), 2);
    assert!(invoices.iter().any(|i| i.message == "Fullført kjøreoppdrag"));
    assert!(invoices.iter().all(|i| i.to.companynum == "929350790"));
    assert_eq!(fx.notifier.count(ContentType::IncomingInvoice).await, 2);

    let summary = fx.routes.wrapup_for_route(&route.id).await.unwrap().unwrap();
    assert_eq!(summary.number_of_deliveries, 2);
    assert_eq!(summary.number_of_pickups, 1);
    assert!((summary.total_distance - 15.0).abs() < 1e-9);

    // Nothing happens on a second attempt
    let status = fx.lifecycle.retry_wrap_up(&route.id, NOW + 7200).await.unwrap();
    assert_eq!(status, RouteStatus::AllDelivered);
    assert_eq!(fx.invoices.invoices().await.len(), 2);
    assert_eq!(fx.payments.payouts().await.len(), 3);

    let again = fx
        .lifecycle
        .handle_delivery(&route.id, 2, NOW + 7200, serde_json::Value::Null)
        .await
        .unwrap();
    assert!(matches!(again, VisitOutcome::Already(_)));
}

#[tokio::test]
async fn test_missing_company_aborts_then_retry_completes() {
    let fx = create_test_fixture(LifecycleConfig::default()).await;
    let route = create_claimed_route(&fx).await;

    fx.lifecycle
        .handle_pickup(&route.id, 0, NOW + 100, serde_json::Value::Null)
        .await
        .unwrap();
    fx.lifecycle
        .handle_delivery(&route.id, 1, NOW + 200, serde_json::Value::Null)
        .await
        .unwrap();

    // The seller's email no longer matches any company
    fx.graph
        .insert_user("s1", UserContact::new("Sara Selger", "sara@new-domain.no"))
        .await;

    let result = fx
        .lifecycle
        .handle_delivery(&route.id, 2, NOW + 300, serde_json::Value::Null)
        .await;
    assert!(matches!(
        result,
        Err(LifecycleError::MissingEntity { kind: "company", .. })
    ));

    let stuck = fx.routes.get_ongoing_route(&route.id).await.unwrap().unwrap();
    assert_eq!(stuck.status, RouteStatus::Finished);
    assert!(stuck.completed_sell_requests.contains_key("s1"));

    fx.routes
        .insert_company(create_test_company("Saras Ved", "sara@new-domain.no"))
        .await;
    let status = fx.lifecycle.retry_wrap_up(&route.id, NOW + 400).await.unwrap();
    assert_eq!(status, RouteStatus::AllDelivered);

    // The deal was settled once
    let sellers: Vec<_> = fx
        .payments
        .payouts()
        .await
        .into_iter()
        .filter(|p| p.target == PayoutTarget::Seller)
        .collect();
    assert_eq!(sellers.len(), 1);
    assert_eq!(fx.invoices.invoices().await.len(), 2);
}

#[tokio::test]
async fn test_deal_close_resumes_after_payout_failure() {
    let fx = create_test_fixture(LifecycleConfig::default()).await;
    let gateway = MockPaymentGateway::new(fx.payments.clone());
    *gateway.fail_pay_operator.lock().unwrap() = 1;
    let lifecycle =
        create_test_lifecycle(&fx, Arc::new(gateway.clone()), Arc::new(fx.notifier.clone()));

    lifecycle
        .overwrite_planned_route("d1", create_test_route(), NOW)
        .await
        .unwrap();
    let route = lifecycle.claim_planned_route("d1", NOW + 60).await.unwrap();

    let result = lifecycle.complete_all_visits(&route.id, NOW + 100).await;
    assert!(matches!(result, Err(LifecycleError::Payment(_))));

    let stuck = fx.routes.get_ongoing_route(&route.id).await.unwrap().unwrap();
    assert_eq!(stuck.status, RouteStatus::Finished);
    assert!(stuck.completed_sell_requests.is_empty());

    let status = lifecycle.retry_wrap_up(&route.id, NOW + 200).await.unwrap();
    assert_eq!(status, RouteStatus::AllDelivered);

    // Each party is paid once across both attempts
    let payouts = fx.payments.payouts().await;
    assert_eq!(count_payouts(&payouts, PayoutTarget::Seller), 1);
    assert_eq!(count_payouts(&payouts, PayoutTarget::Driver), 1);
    assert_eq!(count_payouts(&payouts, PayoutTarget::Operator), 1);

    let seller = fx.graph.get_sell_request("s1").await.unwrap().unwrap();
    assert_eq!(seller.current_capacity, 15);
    assert_eq!(seller.amount_staged, 0);
    assert_eq!(seller.num_staged, 0);

    let done = fx.routes.get_ongoing_route(&route.id).await.unwrap().unwrap();
    assert!(done.completed_sell_requests["s1"].rebalanced);
}

#[tokio::test]
async fn test_recorded_deal_rebalances_once_on_retry() {
    let fx = create_test_fixture(LifecycleConfig::default()).await;
    let route = create_claimed_route(&fx).await;
    fx.lifecycle
        .handle_pickup(&route.id, 0, NOW + 100, serde_json::Value::Null)
        .await
        .unwrap();
    fx.lifecycle
        .handle_delivery(&route.id, 1, NOW + 200, serde_json::Value::Null)
        .await
        .unwrap();

    // Pickup preparation lost: the seller cannot be rebalanced yet
    let mut seller = fx.graph.get_sell_request("s1").await.unwrap().unwrap();
    seller.prepare_for_pickup = 0;
    fx.graph.insert_sell_request(seller.clone()).await;

    let result = fx
        .lifecycle
        .handle_delivery(&route.id, 2, NOW + 300, serde_json::Value::Null)
        .await;
    assert!(matches!(result, Err(LifecycleError::Store(_))));

    let stuck = fx.routes.get_ongoing_route(&route.id).await.unwrap().unwrap();
    assert_eq!(stuck.status, RouteStatus::Finished);
    assert!(!stuck.completed_sell_requests["s1"].rebalanced);
    let buyer = fx.graph.get_buy_request("b2").await.unwrap().unwrap();
    assert!(buyer.claimed_by_driver);

    seller.prepare_for_pickup = 5;
    fx.graph.insert_sell_request(seller).await;
    let status = fx.lifecycle.retry_wrap_up(&route.id, NOW + 400).await.unwrap();
    assert_eq!(status, RouteStatus::AllDelivered);

    let done = fx.routes.get_ongoing_route(&route.id).await.unwrap().unwrap();
    assert!(done.completed_sell_requests["s1"].rebalanced);
    let seller = fx.graph.get_sell_request("s1").await.unwrap().unwrap();
    assert_eq!(seller.current_capacity, 15);
    assert_eq!(seller.prepare_for_pickup, 0);
    for name in ["b1", "b2"] {
        let buyer = fx.graph.get_buy_request(name).await.unwrap().unwrap();
        assert!(!buyer.claimed_by_driver);
    }
    assert_eq!(
        count_payouts(&fx.payments.payouts().await, PayoutTarget::Seller),
        1
    );

    // Closing the deals again leaves the seller alone
    let incoming = fx.payments.incoming_for_route(&route.id).await.unwrap();
    fx.lifecycle
        .close_planned_deals(&done, &incoming, NOW + 500)
        .await
        .unwrap();
    let seller = fx.graph.get_sell_request("s1").await.unwrap().unwrap();
    assert_eq!(seller.current_capacity, 15);
}

#[tokio::test]
async fn test_unpaid_route_held_until_paid() {
    let config = LifecycleConfig {
        require_paid_before_settlement: true,
        ..Default::default()
    };
    let fx = create_test_fixture(config).await;
    let dues = MockDuesHandler::default();
    let calls = dues.calls.clone();
    let lifecycle = RouteLifecycle::new(
        Arc::new(fx.graph.clone()),
        Arc::new(fx.routes.clone()),
        Arc::new(fx.payments.clone()),
        Arc::new(fx.invoices.clone()),
        Arc::new(fx.notifier.clone()),
        fx.lifecycle.config().clone(),
    )
    .with_dues_handler(Arc::new(dues));

    lifecycle
        .overwrite_planned_route("d1", create_test_route(), NOW)
        .await
        .unwrap();
    let route = lifecycle.claim_planned_route("d1", NOW).await.unwrap();
    lifecycle.complete_all_visits(&route.id, NOW + 100).await.unwrap();

    let held = fx.routes.get_ongoing_route(&route.id).await.unwrap().unwrap();
    assert_eq!(held.status, RouteStatus::MissingPayments);
    assert_eq!(held.dues, vec![1, 2]);
    assert!(held.completed_sell_requests.is_empty());
    assert_eq!(calls.lock().unwrap().as_slice(), &[(route.id.clone(), 2)]);

    // Still unpaid: held again
    let status = lifecycle.retry_wrap_up(&route.id, NOW + 200).await.unwrap();
    assert_eq!(status, RouteStatus::MissingPayments);

    for payment in fx.payments.incoming().await {
        fx.payments.mark_incoming_paid(&payment.id).await.unwrap();
    }
    let status = lifecycle.retry_wrap_up(&route.id, NOW + 300).await.unwrap();
    assert_eq!(status, RouteStatus::AllDelivered);

    let done = fx.routes.get_ongoing_route(&route.id).await.unwrap().unwrap();
    assert!(done.dues.is_empty());
    let summary = fx.routes.wrapup_for_route(&route.id).await.unwrap().unwrap();
    assert_eq!(summary.total_income_from_sales_paid, Decimal::new(1000, 0));
}

#[tokio::test]
async fn test_dues_handler_failure_surfaces() {
    let config = LifecycleConfig {
        require_paid_before_settlement: true,
        ..Default::default()
    };
    let fx = create_test_fixture(config.clone()).await;
    let lifecycle = RouteLifecycle::new(
        Arc::new(fx.graph.clone()),
        Arc::new(fx.routes.clone()),
        Arc::new(fx.payments.clone()),
        Arc::new(fx.invoices.clone()),
        Arc::new(fx.notifier.clone()),
        config,
    )
    .with_dues_handler(Arc::new(MockDuesHandler {
        should_fail: true,
        ..Default::default()
    }));

    lifecycle
        .overwrite_planned_route("d1", create_test_route(), NOW)
        .await
        .unwrap();
    let route = lifecycle.claim_planned_route("d1", NOW).await.unwrap();
    let result = lifecycle.complete_all_visits(&route.id, NOW + 100).await;

    assert!(matches!(result, Err(LifecycleError::InvariantViolation(_))));
    let held = fx.routes.get_ongoing_route(&route.id).await.unwrap().unwrap();
    assert_eq!(held.status, RouteStatus::MissingPayments);
}

#[tokio::test]
async fn test_reservation_deal_releases_one_week() {
    let fx = create_test_fixture(LifecycleConfig::default()).await;

    let mut seller = create_test_seller();
    seller.amount_staged = 0;
    seller.num_staged = 0;
    seller.amount_reserved = 4;
    seller.num_reserved = 1;
    fx.graph.insert_sell_request(seller.clone()).await;

    let mut reserving = BuyRequest::new("r1", loc("r1-home", 59.41), 2).with_reservation(2);
    reserving.reserve_target = Some("s1".to_string());
    fx.graph.insert_buy_request(reserving.clone()).await;
    fx.graph
        .insert_user("r1", UserContact::new("Rita", "rita@example.no"))
        .await;
    fx.graph
        .create_relationship(Relationship::Reservation(Reservation {
            buy_request: "r1".to_string(),
            sell_request: "s1".to_string(),
            county: "Vestfold".to_string(),
            calc_time: NOW,
            reserved: 4,
        }))
        .await
        .unwrap();

    let home = loc("d1-home", 59.30);
    let route = vec![
        Visit::pickup(header(&home, &seller.location, 0, 2), seller.clone()).unwrap(),
        Visit::delivery(
            header(&seller.location, &reserving.location, 2, 0),
            seller,
            reserving,
        )
        .unwrap(),
    ];
    fx.lifecycle
        .overwrite_planned_route("d1", route, NOW)
        .await
        .unwrap();
    let ongoing = fx.lifecycle.claim_planned_route("d1", NOW).await.unwrap();
    fx.lifecycle
        .complete_all_visits(&ongoing.id, NOW + 100)
        .await
        .unwrap();

    let seller = fx.graph.get_sell_request("s1").await.unwrap().unwrap();
    assert_eq!(seller.current_capacity, 18);
    assert_eq!(seller.amount_reserved, 2);
    assert_eq!(seller.num_reserved, 1);

    let buyer = fx.graph.get_buy_request("r1").await.unwrap().unwrap();
    assert_eq!(buyer.reserved_weeks, 1);
    assert_eq!(buyer.reserve_target.as_deref(), Some("s1"));
    assert!(fx
        .graph
        .get_relationship(RelationshipKind::Reservation, "r1")
        .await
        .unwrap()
        .is_none());
}
