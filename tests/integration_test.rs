use async_trait::async_trait;
use firewood_logistics::config::AppConfig;
use firewood_logistics::orchestrator::{CycleOrchestrator, InitMode, OrchestratorError};
use firewood_logistics::settlement::{
    InMemoryInvoiceService, LedgerPaymentGateway, LifecycleConfig, LifecycleError,
    NotificationError, Notifier, PaymentSplit, PlanOutcome, RouteLifecycle, VisitOutcome,
};
use firewood_logistics::store::{
    FailedMatchKind, GraphStore, InMemoryFailedMatchStore, InMemoryGraphStore, InMemoryRouteStore,
    RouteStore,
};
use firewood_logistics::types::{
    BuyRequest, Company, ContentType, DriveRequest, Location, Notification, PayoutTarget,
    RelationshipKind, RouteStatus, SellRequest, UserContact,
};
use firewood_logistics::InMemoryApp;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};

const NOW: u64 = 1_700_000_000;
const COUNTY: &str = "Vestfold";

// ═══════════════════════════════════════════════════════════════════════════
// MOCK IMPLEMENTATIONS FOR TESTING
// ═══════════════════════════════════════════════════════════════════════════

/// Notifier that records messages and can be told to fail
#[derive(Clone, Default)]
struct MockNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    should_fail: Arc<Mutex<bool>>,
}

impl MockNotifier {
    fn set_should_fail(&self, fail: bool) {
        *self.should_fail.lock().unwrap() = fail;
    }

    fn sent(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn notify(&self, notification: Notification) -> Result<String, NotificationError> {
        if *self.should_fail.lock().unwrap() {
            return Err(NotificationError::Unavailable(
                "simulated outage".to_string(),
            ));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(notification);
        Ok(format!("notification-{}", sent.len()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════

fn loc(name: &str, lat: f64) -> Location {
    Location::new(name, lat, 10.2, "3185", COUNTY)
}

fn company(name: &str, companynum: &str, email: &str) -> Company {
    Company {
        name: name.to_string(),
        companynum: companynum.to_string(),
        address: "Skogveien 1, 3185 Skoppum".to_string(),
        email: email.to_string(),
        phone: None,
        account_number: None,
    }
}

/// Seller s1 (10 bags), buyers b1 (2) and b2 (3), driver d1, with users,
/// companies and a county price of 200 per bag
async fn populate(graph: &InMemoryGraphStore, routes: &InMemoryRouteStore) {
    graph
        .insert_sell_request(SellRequest::new("s1", loc("yard", 59.40), 10))
        .await;
    graph
        .insert_buy_request(BuyRequest::new("b1", loc("b1-home", 59.42), 2))
        .await;
    graph
        .insert_buy_request(BuyRequest::new("b2", loc("b2-home", 59.50), 3))
        .await;
    graph
        .insert_drive_request(DriveRequest::new("d1", loc("d1-home", 59.30)))
        .await;

    for (request, name, email) in [
        ("s1", "Sara Selger", "sara@example.no"),
        ("b1", "Bjørn Kjøper", "bjorn@example.no"),
        ("b2", "Berit Kjøper", "berit@example.no"),
        ("d1", "Dag Sjåfør", "dag@example.no"),
    ] {
        graph.insert_user(request, UserContact::new(name, email)).await;
    }

    routes
        .insert_company(company("Saras Ved", "911111111", "sara@example.no"))
        .await;
    routes
        .insert_company(company("Dags Transport", "922222222", "dag@example.no"))
        .await;
    routes
        .set_county_price(COUNTY, Decimal::new(200, 0))
        .await;
}

async fn create_test_app() -> InMemoryApp {
    let app = InMemoryApp::from_config(AppConfig::default()).await.unwrap();
    populate(&app.graph, &app.routes).await;
    app
}

// ═══════════════════════════════════════════════════════════════════════════
// END-TO-END FLOWS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_cycle_claim_deliver_settle() {
    let app = create_test_app().await;

    let report = app
        .orchestrator
        .run_cycle(InitMode::Incremental, NOW)
        .await
        .unwrap();
    assert_eq!(
        report.county(COUNTY).unwrap().routes.get("d1"),
        Some(&PlanOutcome::Created)
    );

    let route = app.lifecycle().claim_planned_route("d1", NOW + 60).await.unwrap();
    assert_eq!(route.status, RouteStatus::Ongoing);
    assert!(app.routes.get_planned_route("d1").await.unwrap().is_none());

    let outcomes = app
        .lifecycle()
        .complete_all_visits(&route.id, NOW + 3600)
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, VisitOutcome::Completed(_))));

    let done = app.routes.get_ongoing_route(&route.id).await.unwrap().unwrap();
    assert_eq!(done.status, RouteStatus::AllDelivered);

    // 5 bags at 200 per bag, split 75/20/5
    let payouts = app.payments.payouts().await;
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
    assert_eq!(app.invoices.invoices().await.len(), 2);

    let seller = app.graph.get_sell_request("s1").await.unwrap().unwrap();
    assert_eq!(seller.current_capacity, 5);
    assert_eq!(seller.amount_staged, 0);
    assert_eq!(seller.num_staged, 0);

    let driver = app.graph.get_drive_request("d1").await.unwrap().unwrap();
    assert!(driver.available);

    // Buyers were just served: the next cycle leaves them alone
    let report = app
        .orchestrator
        .run_cycle(InitMode::Incremental, NOW + 4000)
        .await
        .unwrap();
    let county = report.county(COUNTY).unwrap();
    assert!(county.sales.is_empty());
    assert!(county.routes.is_empty());
}

#[tokio::test]
async fn test_decline_then_next_cycle_plans_again() {
    let app = create_test_app().await;

    app.orchestrator
        .run_cycle(InitMode::Incremental, NOW)
        .await
        .unwrap();
    app.lifecycle().decline_planned_route("d1").await.unwrap();

    assert!(app.routes.get_planned_route("d1").await.unwrap().is_none());
    assert!(app.graph.travels_for_driver("d1").await.unwrap().is_empty());
    assert!(app
        .graph
        .relationships(RelationshipKind::StagedDrive)
        .await
        .is_empty());
    let driver = app.graph.get_drive_request("d1").await.unwrap().unwrap();
    assert!(driver.available);
    assert_eq!(driver.num_staged_pickups, 0);

    // Sales are still staged, so only the driver side is redone
    let report = app
        .orchestrator
        .run_cycle(InitMode::Incremental, NOW + 60)
        .await
        .unwrap();
    let county = report.county(COUNTY).unwrap();
    assert_eq!(county.pickups.len(), 1);
    assert_eq!(county.routes.get("d1"), Some(&PlanOutcome::Created));
    assert_eq!(app.notifier.count(ContentType::NewAssignment).await, 2);

    let seller = app.graph.get_sell_request("s1").await.unwrap().unwrap();
    assert_eq!(seller.amount_staged, 5);
}

#[tokio::test]
async fn test_racing_claims_create_one_route() {
    let app = create_test_app().await;
    app.orchestrator
        .run_cycle(InitMode::Incremental, NOW)
        .await
        .unwrap();

    let lifecycle = app.lifecycle();
    let (first, second) = tokio::join!(
        lifecycle.claim_planned_route("d1", NOW + 60),
        lifecycle.claim_planned_route("d1", NOW + 61),
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(LifecycleError::DriverBusy(_)) | Err(LifecycleError::PlannedRouteNotFound(_))
    )));
    assert_eq!(app.routes.ongoing_routes().await.len(), 1);

    // A plan proposed while the driver is out is dropped
    let outcome = lifecycle
        .overwrite_planned_route("d1", Vec::new(), NOW + 120)
        .await
        .unwrap();
    assert!(matches!(outcome, PlanOutcome::Rejected { .. }));
    assert!(app.routes.get_planned_route("d1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_notification_outage_does_not_block_planning() {
    let graph = InMemoryGraphStore::new();
    let routes = InMemoryRouteStore::new();
    populate(&graph, &routes).await;

    let notifier = MockNotifier::default();
    notifier.set_should_fail(true);

    let payments = LedgerPaymentGateway::new(
        PaymentSplit::default(),
        UserContact::new("VEDBJØRN AS", "regninger@vedbjorn.no"),
    );
    let lifecycle = RouteLifecycle::new(
        Arc::new(graph.clone()),
        Arc::new(routes.clone()),
        Arc::new(payments.clone()),
        Arc::new(InMemoryInvoiceService::default()),
        Arc::new(notifier.clone()),
        LifecycleConfig::default(),
    );
    let orchestrator = CycleOrchestrator::builder()
        .with_graph(Arc::new(graph.clone()))
        .with_routes(Arc::new(routes.clone()))
        .with_lifecycle(Arc::new(lifecycle))
        .with_failed_matches(Arc::new(InMemoryFailedMatchStore::new()))
        .build()
        .unwrap();

    // A second county with a buyer and no seller
    graph
        .insert_buy_request(BuyRequest::new(
            "far",
            Location::new("far-home", 69.6, 18.9, "9008", "Troms"),
            2,
        ))
        .await;

    let report = orchestrator
        .run_cycle(InitMode::Incremental, NOW)
        .await
        .unwrap();
    assert!(report.errors.is_empty());
    assert_eq!(
        report.county(COUNTY).unwrap().routes.get("d1"),
        Some(&PlanOutcome::Created)
    );
    assert_eq!(report.county("Troms").unwrap().failed_sales, vec!["far"]);
    assert_eq!(notifier.sent(), 0);

    // The driver claims while the channel is still down
    let route = orchestrator
        .lifecycle()
        .claim_planned_route("d1", NOW + 60)
        .await
        .unwrap();
    for name in ["b1", "b2"] {
        let buyer = graph.get_buy_request(name).await.unwrap().unwrap();
        assert!(buyer.claimed_by_driver);
    }
    assert!(routes.get_planned_route("d1").await.unwrap().is_none());
    assert_eq!(notifier.sent(), 0);

    // Messages flow again once the channel recovers
    notifier.set_should_fail(false);
    orchestrator
        .lifecycle()
        .complete_all_visits(&route.id, NOW + 3600)
        .await
        .unwrap();
    let done = routes.get_ongoing_route(&route.id).await.unwrap().unwrap();
    assert_eq!(done.status, RouteStatus::AllDelivered);
    assert_eq!(payments.incoming().await.len(), 2);
    assert!(notifier.sent() > 0);
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let mut config = AppConfig::default();
    config.payments.driver_share_bps = 9_900;
    config.payments.operator_share_bps = 500;

    let err = InMemoryApp::from_config(config).await.err().unwrap();
    assert!(matches!(err, OrchestratorError::Config(_)));
}

#[tokio::test]
async fn test_sqlite_ledger_from_config() {
    let path = std::env::temp_dir().join(format!("firewood-ledger-{}.db", std::process::id()));
    let _ = std::fs::remove_file(&path);

    let mut config = AppConfig::default();
    config.storage.failed_match_db = Some(path.display().to_string());
    let app = InMemoryApp::from_config(config).await.unwrap();
    app.graph
        .insert_buy_request(BuyRequest::new("lonely", loc("lonely-home", 59.42), 4))
        .await;

    app.orchestrator
        .run_cycle(InitMode::Incremental, NOW)
        .await
        .unwrap();
    app.orchestrator
        .run_cycle(InitMode::Incremental, NOW + 3600)
        .await
        .unwrap();

    let entries = app
        .orchestrator
        .ledger()
        .entries(FailedMatchKind::Sale, Some(COUNTY))
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].attempts, 2);
    assert_eq!(entries[0].next_retry_at, NOW + 3600 + 7200);

    drop(app);
    let _ = std::fs::remove_file(&path);
}
