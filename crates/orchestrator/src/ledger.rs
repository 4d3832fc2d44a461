use firewood_store::{FailedMatch, FailedMatchKind, FailedMatchStore, StoreError};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::ExponentialBackoff;

/// What a reconciliation pass changed in the ledger
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerDelta {
    /// Entries created or bumped this cycle
    pub recorded: usize,
    /// Entries removed because the request was matched
    pub cleared: usize,
}

/// Keeps unmatched requests across cycles with an exponential retry schedule.
///
/// Matchers always see every eligible request; the ledger only records how
/// long something has been waiting and when it is next worth surfacing.
pub struct FailedMatchLedger {
    store: Arc<dyn FailedMatchStore>,
    backoff: ExponentialBackoff,
}

impl FailedMatchLedger {
    pub fn new(store: Arc<dyn FailedMatchStore>, backoff: ExponentialBackoff) -> Self {
        Self { store, backoff }
    }

    /// Record this cycle's failures and clear entries that are now matched
    pub async fn reconcile(
        &self,
        kind: FailedMatchKind,
        county: &str,
        matched: &[String],
        failed: &[String],
        now: u64,
    ) -> Result<LedgerDelta, StoreError> {
        let mut delta = LedgerDelta::default();

        for name in failed {
            self.record_failure(kind, county, name, now).await?;
            delta.recorded += 1;
        }

        let failed: HashSet<&String> = failed.iter().collect();
        for name in matched.iter().filter(|n| !failed.contains(n)) {
            if self.store.remove(kind, name).await? {
                info!(kind = %kind, county = %county, name = %name, "Previously failed match satisfied");
                delta.cleared += 1;
            }
        }

        Ok(delta)
    }

    pub async fn record_failure(
        &self,
        kind: FailedMatchKind,
        county: &str,
        name: &str,
        now: u64,
    ) -> Result<FailedMatch, StoreError> {
        let mut entry = match self.store.get(kind, name).await? {
            Some(mut existing) => {
                existing.attempts += 1;
                existing.last_failed_at = now;
                existing.county = county.to_string();
                existing
            }
            None => FailedMatch::new(kind, name, county, now),
        };
        entry.next_retry_at = now + self.backoff.delay_for_attempt(entry.attempts).as_secs();
        self.store.upsert(&entry).await?;

        debug!(
            kind = %kind,
            county = %county,
            name = %name,
            attempts = entry.attempts,
            next_retry_at = entry.next_retry_at,
            "Failed match recorded"
        );
        Ok(entry)
    }

    /// Entries whose retry time has come
    pub async fn due(
        &self,
        kind: FailedMatchKind,
        county: Option<&str>,
        now: u64,
    ) -> Result<Vec<FailedMatch>, StoreError> {
        Ok(self
            .store
            .list(kind, county)
            .await?
            .into_iter()
            .filter(|e| e.is_due(now))
            .collect())
    }

    pub async fn entries(
        &self,
        kind: FailedMatchKind,
        county: Option<&str>,
    ) -> Result<Vec<FailedMatch>, StoreError> {
        self.store.list(kind, county).await
    }
}
