use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedMatchKind {
    /// Buyer found no seller with room for its reservation
    Reservation,
    /// Buyer found no seller with room for a single-cycle sale
    Sale,
    /// Seller found no available driver
    Pickup,
}

impl fmt::Display for FailedMatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailedMatchKind::Reservation => write!(f, "reservation"),
            FailedMatchKind::Sale => write!(f, "sale"),
            FailedMatchKind::Pickup => write!(f, "pickup"),
        }
    }
}

impl FromStr for FailedMatchKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reservation" => Ok(FailedMatchKind::Reservation),
            "sale" => Ok(FailedMatchKind::Sale),
            "pickup" => Ok(FailedMatchKind::Pickup),
            other => Err(StoreError::SerializationError(format!(
                "unknown failed match kind: {other}"
            ))),
        }
    }
}

/// A request that could not be matched, kept across cycles for retry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedMatch {
    pub kind: FailedMatchKind,
    pub name: String,
    pub county: String,
    pub attempts: u32,
    pub first_failed_at: u64,
    pub last_failed_at: u64,
    pub next_retry_at: u64,
}

impl FailedMatch {
    pub fn new(
        kind: FailedMatchKind,
        name: impl Into<String>,
        county: impl Into<String>,
        now: u64,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            county: county.into(),
            attempts: 1,
            first_failed_at: now,
            last_failed_at: now,
            next_retry_at: now,
        }
    }

    pub fn is_due(&self, now: u64) -> bool {
        now >= self.next_retry_at
    }
}

/// Persistence of failed matches
#[async_trait]
pub trait FailedMatchStore: Send + Sync {
    async fn get(&self, kind: FailedMatchKind, name: &str)
        -> Result<Option<FailedMatch>, StoreError>;

    async fn upsert(&self, entry: &FailedMatch) -> Result<(), StoreError>;

    /// Returns `true` when an entry was removed
    async fn remove(&self, kind: FailedMatchKind, name: &str) -> Result<bool, StoreError>;

    async fn list(
        &self,
        kind: FailedMatchKind,
        county: Option<&str>,
    ) -> Result<Vec<FailedMatch>, StoreError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-MEMORY STORE (for testing)
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Clone)]
pub struct InMemoryFailedMatchStore {
    entries: Arc<RwLock<BTreeMap<(FailedMatchKind, String), FailedMatch>>>,
}

impl InMemoryFailedMatchStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FailedMatchStore for InMemoryFailedMatchStore {
    async fn get(
        &self,
        kind: FailedMatchKind,
        name: &str,
    ) -> Result<Option<FailedMatch>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries.get(&(kind, name.to_string())).cloned())
    }

    async fn upsert(&self, entry: &FailedMatch) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.insert((entry.kind, entry.name.clone()), entry.clone());
        Ok(())
    }

    async fn remove(&self, kind: FailedMatchKind, name: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().await;
        Ok(entries.remove(&(kind, name.to_string())).is_some())
    }

    async fn list(
        &self,
        kind: FailedMatchKind,
        county: Option<&str>,
    ) -> Result<Vec<FailedMatch>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .values()
            .filter(|e| e.kind == kind)
            .filter(|e| county.map_or(true, |c| e.county == c))
            .cloned()
            .collect())
    }
}
