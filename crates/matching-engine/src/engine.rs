use firewood_store::GraphStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::DistanceProvider;

#[derive(Debug, Clone)]
pub struct MatchingConfig {
    /// Minimum time since a buyer was last served before it is matched again
    pub minimum_age_secs: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            minimum_age_secs: 432_000, // 5 days
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Relationship created and counters updated in this run
    New,
    /// Reservation re-bound to its sticky seller without touching counters
    Sticky,
    /// Relationship already existed before this run
    Existing,
}

/// One successful binding produced by a matcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    /// Buyer for sales and reservations, seller for driver assignments
    pub source: String,
    /// Seller for sales and reservations, driver for driver assignments
    pub target: String,
    /// Bags reserved or staged; zero for driver assignments
    pub amount: u32,
    pub status: MatchStatus,
}

impl Match {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        amount: u32,
        status: MatchStatus,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            amount,
            status,
        }
    }
}

/// Outcome of one matcher over one county
#[derive(Debug, Clone, PartialEq)]
pub struct MatchReport<F> {
    pub county: String,
    pub ok: Vec<Match>,
    /// Requests that found no counterpart this run
    pub failed: Vec<F>,
}

impl<F> MatchReport<F> {
    pub fn new(county: impl Into<String>) -> Self {
        Self {
            county: county.into(),
            ok: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn count(&self, status: MatchStatus) -> usize {
        self.ok.iter().filter(|m| m.status == status).count()
    }
}

/// Runs the matching pipeline against a graph store.
///
/// Each phase reads a per-county snapshot and writes relationships and
/// counter deltas back through the store, one atomic call per entity.
pub struct MatchingEngine {
    pub(crate) graph: Arc<dyn GraphStore>,
    pub(crate) distance: Arc<dyn DistanceProvider>,
    pub(crate) config: MatchingConfig,
}

impl MatchingEngine {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        distance: Arc<dyn DistanceProvider>,
        config: MatchingConfig,
    ) -> Self {
        Self {
            graph,
            distance,
            config,
        }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }
}
