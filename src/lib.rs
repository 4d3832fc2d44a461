//! Firewood logistics: matching sellers, buyers and drivers, building
//! pickup/delivery routes and settling them once driven.
//!
//! The workspace crates are re-exported under short names. [`InMemoryApp`]
//! wires every component from an [`AppConfig`] on top of the in-memory
//! collaborators, for dry runs and end-to-end tests.

pub use firewood_config as config;
pub use firewood_matching_engine as matching;
pub use firewood_orchestrator as orchestrator;
pub use firewood_settlement as settlement;
pub use firewood_store as store;
pub use firewood_types as types;

use firewood_config::AppConfig;
use firewood_orchestrator::{settings, CycleOrchestrator, OrchestratorError};
use firewood_settlement::{
    InMemoryInvoiceService, InMemoryNotifier, LedgerPaymentGateway, RouteLifecycle,
};
use firewood_store::{InMemoryGraphStore, InMemoryRouteStore};
use std::sync::Arc;

/// Every component of the system over in-memory stores and services
pub struct InMemoryApp {
    pub graph: InMemoryGraphStore,
    pub routes: InMemoryRouteStore,
    pub payments: LedgerPaymentGateway,
    pub invoices: InMemoryInvoiceService,
    pub notifier: InMemoryNotifier,
    pub orchestrator: CycleOrchestrator,
}

impl InMemoryApp {
    /// Validate `config` and assemble the system.
    ///
    /// The failed-match ledger follows `storage.failed_match_db`, so it may
    /// still be SQLite-backed.
    pub async fn from_config(config: AppConfig) -> Result<Self, OrchestratorError> {
        firewood_config::validate_config(&config)?;

        let graph = InMemoryGraphStore::new();
        let routes = InMemoryRouteStore::new();
        let payments = LedgerPaymentGateway::new(
            settings::payment_split(&config),
            settings::operator_contact(&config.operator),
        );
        let invoices = InMemoryInvoiceService::new(settings::invoice_terms(&config)?);
        let notifier = InMemoryNotifier::new();
        let failed_matches = settings::open_failed_match_store(&config.storage).await?;

        let lifecycle = RouteLifecycle::new(
            Arc::new(graph.clone()),
            Arc::new(routes.clone()),
            Arc::new(payments.clone()),
            Arc::new(invoices.clone()),
            Arc::new(notifier.clone()),
            settings::lifecycle_config(&config),
        );

        let orchestrator = CycleOrchestrator::builder()
            .with_graph(Arc::new(graph.clone()))
            .with_routes(Arc::new(routes.clone()))
            .with_lifecycle(Arc::new(lifecycle))
            .with_failed_matches(failed_matches)
            .with_config(config)
            .build()?;

        Ok(Self {
            graph,
            routes,
            payments,
            invoices,
            notifier,
            orchestrator,
        })
    }

    pub fn lifecycle(&self) -> &RouteLifecycle {
        self.orchestrator.lifecycle()
    }
}
