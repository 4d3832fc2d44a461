use serde::{Deserialize, Serialize};

use crate::Location;

// ═══════════════════════════════════════════════════════════════════════════
// MATCHING RELATIONSHIPS
// ═══════════════════════════════════════════════════════════════════════════

/// Buyer → seller multi-week reservation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub buy_request: String,
    pub sell_request: String,
    pub county: String,
    pub calc_time: u64,
    /// Bags held on the seller for the full reservation
    pub reserved: u32,
}

/// Buyer → seller single-cycle sale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedSell {
    pub buy_request: String,
    pub sell_request: String,
    pub county: String,
    pub calc_time: u64,
    pub staged: u32,
}

/// Driver → seller pickup binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedDrive {
    pub drive_request: String,
    pub sell_request: String,
    pub county: String,
    pub calc_time: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    Reservation,
    StagedSell,
    StagedDrive,
}

/// Any matching relationship, as returned by bulk cursor queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Relationship {
    Reservation(Reservation),
    StagedSell(StagedSell),
    StagedDrive(StagedDrive),
}

impl Relationship {
    pub fn kind(&self) -> RelationshipKind {
        match self {
            Relationship::Reservation(_) => RelationshipKind::Reservation,
            Relationship::StagedSell(_) => RelationshipKind::StagedSell,
            Relationship::StagedDrive(_) => RelationshipKind::StagedDrive,
        }
    }

    pub fn county(&self) -> &str {
        match self {
            Relationship::Reservation(r) => &r.county,
            Relationship::StagedSell(s) => &s.county,
            Relationship::StagedDrive(d) => &d.county,
        }
    }

    /// Stable cursor key: the source node name, unique per kind
    pub fn source(&self) -> &str {
        match self {
            Relationship::Reservation(r) => &r.buy_request,
            Relationship::StagedSell(s) => &s.buy_request,
            Relationship::StagedDrive(d) => &d.sell_request,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TRAVEL EDGES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TravelKind {
    TravelToPickup,
    TravelToDeliver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TravelStatus {
    Planned,
    Completed,
}

/// One leg of a built route persisted as a graph edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Travel {
    pub drive_request: String,
    pub kind: TravelKind,
    pub from: Location,
    pub to: Location,
    /// Seller for pickups, buyer for deliveries
    pub counterparty: String,
    pub distance: f64,
    pub loaded_before: u32,
    pub loaded_after: u32,
    pub status: TravelStatus,
    pub calc_time: u64,
}
