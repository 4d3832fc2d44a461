use firewood_config::AppConfig;
use firewood_matching_engine::{
    DistanceProvider, HaversineDistance, Match, MatchReport, MatchingEngine,
};
use firewood_settlement::{PlanOutcome, RouteLifecycle};
use firewood_store::{
    FailedMatchKind, FailedMatchStore, GraphStore, GraphStoreExt, RouteStore, SellCounterDelta,
};
use firewood_types::RelationshipKind;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{settings, BuilderError, FailedMatchLedger, LedgerDelta, OrchestratorError};

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════

/// How a cycle treats relationships left over from earlier cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitMode {
    /// Keep existing bindings; matchers only add what is missing
    Incremental,
    /// Withdraw unclaimed staged sells and idle drivers' bindings first
    Clean,
}

#[derive(Debug, Clone, Default)]
pub struct CycleConfig {
    /// Run counties concurrently
    pub parallel_counties: bool,
}

// ═══════════════════════════════════════════════════════════════════════════
// REPORTS
// ═══════════════════════════════════════════════════════════════════════════

/// What one county produced in a cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountyReport {
    pub county: String,
    pub reservations: Vec<Match>,
    pub failed_reservations: Vec<String>,
    pub sales: Vec<Match>,
    pub failed_sales: Vec<String>,
    pub pickups: Vec<Match>,
    /// Sellers no driver could take
    pub unassigned_sellers: Vec<String>,
    pub routes: BTreeMap<String, PlanOutcome>,
    pub ledger: LedgerDelta,
}

/// Work done before the county passes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub released_drivers: Vec<String>,
    pub withdrawn_sells: usize,
    pub removed_drives: usize,
    pub removed_travels: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub calc_time: u64,
    pub mode: InitMode,
    pub cleanup: CleanupReport,
    pub counties: Vec<CountyReport>,
    /// Counties whose pass aborted, with the reason
    pub errors: Vec<(String, String)>,
}

impl CycleReport {
    pub fn county(&self, county: &str) -> Option<&CountyReport> {
        self.counties.iter().find(|c| c.county == county)
    }

    pub fn planned_routes(&self) -> usize {
        self.counties
            .iter()
            .flat_map(|c| c.routes.values())
            .filter(|o| !matches!(o, PlanOutcome::Rejected { .. }))
            .count()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════

pub struct CycleOrchestratorBuilder {
    graph: Option<Arc<dyn GraphStore>>,
    routes: Option<Arc<dyn RouteStore>>,
    lifecycle: Option<Arc<RouteLifecycle>>,
    failed_matches: Option<Arc<dyn FailedMatchStore>>,
    distance: Arc<dyn DistanceProvider>,
    app_config: AppConfig,
}

impl CycleOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            graph: None,
            routes: None,
            lifecycle: None,
            failed_matches: None,
            distance: Arc::new(HaversineDistance),
            app_config: AppConfig::default(),
        }
    }

    pub fn with_graph(mut self, graph: Arc<dyn GraphStore>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn with_routes(mut self, routes: Arc<dyn RouteStore>) -> Self {
        self.routes = Some(routes);
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Arc<RouteLifecycle>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn with_failed_matches(mut self, store: Arc<dyn FailedMatchStore>) -> Self {
        self.failed_matches = Some(store);
        self
    }

    pub fn with_distance(mut self, distance: Arc<dyn DistanceProvider>) -> Self {
        self.distance = distance;
        self
    }

    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.app_config = config;
        self
    }

    pub fn build(self) -> Result<CycleOrchestrator, BuilderError> {
        let graph = self.graph.ok_or_else(|| BuilderError::MissingField {
            field: "graph".to_string(),
        })?;

        let routes = self.routes.ok_or_else(|| BuilderError::MissingField {
            field: "routes".to_string(),
        })?;

        let lifecycle = self.lifecycle.ok_or_else(|| BuilderError::MissingField {
            field: "lifecycle".to_string(),
        })?;

        let failed_matches = self.failed_matches.ok_or_else(|| BuilderError::MissingField {
            field: "failed_matches".to_string(),
        })?;

        let engine = MatchingEngine::new(
            graph.clone(),
            self.distance,
            settings::matching_config(&self.app_config),
        );
        let ledger = FailedMatchLedger::new(failed_matches, settings::backoff(&self.app_config.retry));

        Ok(CycleOrchestrator {
            graph,
            routes,
            engine,
            lifecycle,
            ledger,
            config: CycleConfig {
                parallel_counties: self.app_config.matching.parallel_counties,
            },
        })
    }
}

impl Default for CycleOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CYCLE
// ═══════════════════════════════════════════════════════════════════════════

/// Batch entry point: one call runs the whole matching pipeline once.
///
/// Counties are independent. A county whose pass fails is logged and
/// reported; the other counties still run.
pub struct CycleOrchestrator {
    graph: Arc<dyn GraphStore>,
    routes: Arc<dyn RouteStore>,
    engine: MatchingEngine,
    lifecycle: Arc<RouteLifecycle>,
    ledger: FailedMatchLedger,
    config: CycleConfig,
}

impl CycleOrchestrator {
    pub fn builder() -> CycleOrchestratorBuilder {
        CycleOrchestratorBuilder::new()
    }

    pub fn lifecycle(&self) -> &Arc<RouteLifecycle> {
        &self.lifecycle
    }

    pub fn ledger(&self) -> &FailedMatchLedger {
        &self.ledger
    }

    pub async fn run_cycle(
        &self,
        mode: InitMode,
        calc_time: u64,
    ) -> Result<CycleReport, OrchestratorError> {
        info!(mode = ?mode, calc_time, "Cycle started");

        let counties = self.graph.counties().await?;
        let mut cleanup = CleanupReport {
            released_drivers: self.release_quarantined_drivers(&counties, calc_time).await?,
            ..Default::default()
        };
        if mode == InitMode::Clean {
            self.clean_slate(&counties, &mut cleanup).await?;
        }

        let results: Vec<(String, Result<CountyReport, OrchestratorError>)> =
            if self.config.parallel_counties {
                join_all(counties.iter().map(|county| async move {
                    (county.clone(), self.run_county(county, calc_time).await)
                }))
                .await
            } else {
                let mut results = Vec::with_capacity(counties.len());
                for county in &counties {
                    results.push((county.clone(), self.run_county(county, calc_time).await));
                }
                results
            };

        let mut report = CycleReport {
            calc_time,
            mode,
            cleanup,
            counties: Vec::new(),
            errors: Vec::new(),
        };
        for (county, result) in results {
            match result {
                Ok(county_report) => report.counties.push(county_report),
                Err(e) => {
                    error!(county = %county, error = %e, "County pass failed");
                    report.errors.push((county, e.to_string()));
                }
            }
        }

        info!(
            counties = report.counties.len(),
            failed_counties = report.errors.len(),
            planned_routes = report.planned_routes(),
            "Cycle finished"
        );
        Ok(report)
    }

    /// Reservations, then sales, then drivers, then routes for one county
    pub async fn run_county(
        &self,
        county: &str,
        calc_time: u64,
    ) -> Result<CountyReport, OrchestratorError> {
        let reservations = self.engine.match_reservations(county, calc_time).await?;
        let sales = self.engine.match_sales(county, calc_time).await?;
        let pickups = self.engine.assign_drivers(county, calc_time).await?;
        let built = self.engine.build_routes(county, calc_time).await?;
        let routes = self.lifecycle.handle_routes(&built, calc_time).await?;

        let mut ledger = LedgerDelta::default();
        for (kind, matched, failed) in [
            (
                FailedMatchKind::Reservation,
                sources(&reservations),
                failed_names(&reservations, |b| &b.name),
            ),
            (
                FailedMatchKind::Sale,
                sources(&sales),
                failed_names(&sales, |b| &b.name),
            ),
            (
                FailedMatchKind::Pickup,
                sources(&pickups),
                failed_names(&pickups, |s| &s.name),
            ),
        ] {
            let delta = self
                .ledger
                .reconcile(kind, county, &matched, &failed, calc_time)
                .await?;
            ledger.recorded += delta.recorded;
            ledger.cleared += delta.cleared;
        }

        let report = CountyReport {
            county: county.to_string(),
            failed_reservations: failed_names(&reservations, |b| &b.name),
            reservations: reservations.ok,
            failed_sales: failed_names(&sales, |b| &b.name),
            sales: sales.ok,
            unassigned_sellers: failed_names(&pickups, |s| &s.name),
            pickups: pickups.ok,
            routes,
            ledger,
        };

        info!(
            county = %county,
            reservations = report.reservations.len(),
            failed_reservations = report.failed_reservations.len(),
            sales = report.sales.len(),
            failed_sales = report.failed_sales.len(),
            pickups = report.pickups.len(),
            unassigned_sellers = report.unassigned_sellers.len(),
            routes = report.routes.len(),
            "County pass finished"
        );
        Ok(report)
    }

    /// Make drivers whose quarantine has expired available again
    async fn release_quarantined_drivers(
        &self,
        counties: &[String],
        now: u64,
    ) -> Result<Vec<String>, OrchestratorError> {
        let mut released = Vec::new();
        for county in counties {
            for driver in self.graph.drive_requests_in_county(county).await? {
                if driver.available
                    || driver.available_again_time == 0
                    || driver.available_again_time > now
                {
                    continue;
                }
                self.graph
                    .set_driver_availability(&driver.name, true, 0)
                    .await?;
                info!(driver = %driver.name, county = %county, "Driver quarantine expired");
                released.push(driver.name);
            }
        }
        Ok(released)
    }

    /// Withdraw bindings that nobody has acted on yet.
    ///
    /// Staged sells whose buyer is already on a claimed route stay, and so do
    /// the bindings of drivers with an active route. Reservations are kept.
    async fn clean_slate(
        &self,
        counties: &[String],
        cleanup: &mut CleanupReport,
    ) -> Result<(), OrchestratorError> {
        for county in counties {
            for staged in self.graph.staged_sells_in_county(county).await? {
                let claimed = self
                    .graph
                    .get_buy_request(&staged.buy_request)
                    .await?
                    .map_or(false, |b| b.claimed_by_driver);
                if claimed {
                    continue;
                }
                let removed = self
                    .graph
                    .delete_relationship(RelationshipKind::StagedSell, &staged.buy_request)
                    .await?;
                if removed.is_some() {
                    self.graph
                        .update_sell_counters(
                            &staged.sell_request,
                            SellCounterDelta::unstage(staged.staged),
                        )
                        .await?;
                    cleanup.withdrawn_sells += 1;
                }
            }

            for driver in self.graph.drive_requests_in_county(county).await? {
                if self.routes.active_ongoing_route(&driver.name).await?.is_some() {
                    debug!(driver = %driver.name, "Driver on a route, keeping bindings");
                    continue;
                }
                let bindings = self
                    .graph
                    .relationships_to(RelationshipKind::StagedDrive, &driver.name)
                    .await?;
                for binding in &bindings {
                    if self
                        .graph
                        .delete_relationship(RelationshipKind::StagedDrive, binding.source())
                        .await?
                        .is_some()
                    {
                        cleanup.removed_drives += 1;
                    }
                }
                if !bindings.is_empty() || driver.num_staged_pickups > 0 {
                    self.graph.reset_staged_pickups(&driver.name).await?;
                }
                cleanup.removed_travels += self.graph.remove_travels_for_driver(&driver.name).await?;
            }
        }

        if cleanup.withdrawn_sells + cleanup.removed_drives + cleanup.removed_travels > 0 {
            warn!(
                withdrawn_sells = cleanup.withdrawn_sells,
                removed_drives = cleanup.removed_drives,
                removed_travels = cleanup.removed_travels,
                "Clean start withdrew earlier bindings"
            );
        }
        Ok(())
    }
}

fn sources<F>(report: &MatchReport<F>) -> Vec<String> {
    report.ok.iter().map(|m| m.source.clone()).collect()
}

fn failed_names<F>(report: &MatchReport<F>, name: impl Fn(&F) -> &String) -> Vec<String> {
    report.failed.iter().map(|f| name(f).clone()).collect()
}
