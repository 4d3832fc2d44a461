use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::{BuyRequest, Location, SellRequest};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VisitError {
    #[error("missing {0} in visit")]
    MissingField(&'static str),

    #[error("invalid distance: {0}")]
    InvalidDistance(f64),

    #[error("cargo mismatch on {kind}: loaded_before={before}, loaded_after={after}, expected change={expected}")]
    CargoMismatch {
        kind: VisitKind,
        before: u32,
        after: u32,
        expected: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitKind {
    Pickup,
    Delivery,
    Return,
}

impl fmt::Display for VisitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VisitKind::Pickup => write!(f, "pickup"),
            VisitKind::Delivery => write!(f, "delivery"),
            VisitKind::Return => write!(f, "return"),
        }
    }
}

/// Execution state of one visit inside an ongoing route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitedStatus {
    #[default]
    Pending,
    Completed,
    Invalid,
    Withdrawn,
}

/// Fields shared by every visit kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitHeader {
    pub from: Location,
    pub to: Location,
    /// Distance from the previous stop
    pub distance: f64,
    pub drive_request: String,
    pub loaded_before: u32,
    pub loaded_after: u32,
}

/// One stop on a driver route.
///
/// Build visits through [`Visit::pickup`], [`Visit::delivery`] and
/// [`Visit::return_to`]; deserialized visits should be checked with
/// [`Visit::validate`] before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Visit {
    Pickup {
        header: VisitHeader,
        sell_request: SellRequest,
    },
    Delivery {
        header: VisitHeader,
        sell_request: SellRequest,
        buy_request: BuyRequest,
    },
    Return {
        header: VisitHeader,
        sell_request: SellRequest,
    },
}

impl Visit {
    pub fn pickup(header: VisitHeader, sell_request: SellRequest) -> Result<Self, VisitError> {
        let visit = Visit::Pickup {
            header,
            sell_request,
        };
        visit.validate()?;
        Ok(visit)
    }

    pub fn delivery(
        header: VisitHeader,
        sell_request: SellRequest,
        buy_request: BuyRequest,
    ) -> Result<Self, VisitError> {
        let visit = Visit::Delivery {
            header,
            sell_request,
            buy_request,
        };
        visit.validate()?;
        Ok(visit)
    }

    pub fn return_to(header: VisitHeader, sell_request: SellRequest) -> Result<Self, VisitError> {
        let visit = Visit::Return {
            header,
            sell_request,
        };
        visit.validate()?;
        Ok(visit)
    }

    pub fn kind(&self) -> VisitKind {
        match self {
            Visit::Pickup { .. } => VisitKind::Pickup,
            Visit::Delivery { .. } => VisitKind::Delivery,
            Visit::Return { .. } => VisitKind::Return,
        }
    }

    pub fn header(&self) -> &VisitHeader {
        match self {
            Visit::Pickup { header, .. }
            | Visit::Delivery { header, .. }
            | Visit::Return { header, .. } => header,
        }
    }

    pub fn sell_request(&self) -> &SellRequest {
        match self {
            Visit::Pickup { sell_request, .. }
            | Visit::Delivery { sell_request, .. }
            | Visit::Return { sell_request, .. } => sell_request,
        }
    }

    pub fn buy_request(&self) -> Option<&BuyRequest> {
        match self {
            Visit::Delivery { buy_request, .. } => Some(buy_request),
            _ => None,
        }
    }

    /// Name of the party met at this stop: the buyer for deliveries, otherwise the seller
    pub fn counterparty(&self) -> &str {
        match self {
            Visit::Delivery { buy_request, .. } => &buy_request.name,
            Visit::Pickup { sell_request, .. } | Visit::Return { sell_request, .. } => {
                &sell_request.name
            }
        }
    }

    /// Bags loaded at a pickup; zero for other kinds
    pub fn loaded_here(&self) -> u32 {
        match self {
            Visit::Pickup { header, .. } => header.loaded_after.saturating_sub(header.loaded_before),
            _ => 0,
        }
    }

    pub fn validate(&self) -> Result<(), VisitError> {
        let header = self.header();
        if header.drive_request.is_empty() {
            return Err(VisitError::MissingField("driveRequest"));
        }
        if !header.distance.is_finite() || header.distance < 0.0 {
            return Err(VisitError::InvalidDistance(header.distance));
        }
        if self.sell_request().name.is_empty() {
            return Err(VisitError::MissingField("sellRequest"));
        }

        match self {
            Visit::Pickup { header, .. } => {
                if header.loaded_after < header.loaded_before {
                    return Err(VisitError::CargoMismatch {
                        kind: VisitKind::Pickup,
                        before: header.loaded_before,
                        after: header.loaded_after,
                        expected: 0,
                    });
                }
            }
            Visit::Delivery {
                header,
                buy_request,
                ..
            } => {
                if buy_request.name.is_empty() {
                    return Err(VisitError::MissingField("buyRequest"));
                }
                let expected = buy_request.current_requirement;
                if header.loaded_before.checked_sub(expected) != Some(header.loaded_after) {
                    return Err(VisitError::CargoMismatch {
                        kind: VisitKind::Delivery,
                        before: header.loaded_before,
                        after: header.loaded_after,
                        expected,
                    });
                }
            }
            Visit::Return { header, .. } => {
                if header.loaded_after > header.loaded_before {
                    return Err(VisitError::CargoMismatch {
                        kind: VisitKind::Return,
                        before: header.loaded_before,
                        after: header.loaded_after,
                        expected: 0,
                    });
                }
            }
        }

        Ok(())
    }
}
