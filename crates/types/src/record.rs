use serde::{Deserialize, Serialize};

use crate::{format_timestamp, Visit, VisitKind};

/// Uniqueness key of a completion record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VisitKey {
    pub drive_request: String,
    pub ongoing_route: String,
    pub kind: VisitKind,
    /// Seller for pickups and returns, buyer for deliveries
    pub counterparty: String,
}

/// Persisted proof that a visit was executed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitRecord {
    pub id: String,
    pub key: VisitKey,
    pub index: usize,
    pub visit: Visit,
    pub completed: u64,
    pub completed_str: String,
    /// Confirmation code shown to the buyer on delivery
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub payment_ref: Option<String>,
    #[serde(default)]
    pub notification: Option<String>,
    /// Caller-supplied context, e.g. photo references from the driver app
    #[serde(default)]
    pub meta: serde_json::Value,
}

impl VisitRecord {
    pub fn new(
        id: impl Into<String>,
        ongoing_route: impl Into<String>,
        index: usize,
        visit: Visit,
        completed: u64,
    ) -> Self {
        let key = VisitKey {
            drive_request: visit.header().drive_request.clone(),
            ongoing_route: ongoing_route.into(),
            kind: visit.kind(),
            counterparty: visit.counterparty().to_string(),
        };
        Self {
            id: id.into(),
            key,
            index,
            visit,
            completed,
            completed_str: format_timestamp(completed),
            code: None,
            payment_ref: None,
            notification: None,
            meta: serde_json::Value::Null,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = meta;
        self
    }
}
