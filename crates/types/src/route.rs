use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{BuyRequest, SellRequest, Visit, VisitKind, VisitedStatus};

/// Per-seller rollup of the buyers served by one route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub sell_request: SellRequest,
    pub sells: Vec<BuyRequest>,
    pub number_of_bags_sold: u32,
}

impl Deal {
    /// Group the deliveries of a route by seller
    pub fn collect(route: &[Visit]) -> BTreeMap<String, Deal> {
        let mut deals: BTreeMap<String, Deal> = BTreeMap::new();
        for visit in route {
            let seller = visit.sell_request();
            let deal = deals.entry(seller.name.clone()).or_insert_with(|| Deal {
                sell_request: seller.clone(),
                sells: Vec::new(),
                number_of_bags_sold: 0,
            });
            if let Some(buyer) = visit.buy_request() {
                deal.number_of_bags_sold += buyer.current_requirement;
                deal.sells.push(buyer.clone());
            }
        }
        deals
    }
}

/// A proposed route for one driver, replaced wholesale until claimed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedRoute {
    pub drive_request: String,
    pub route: Vec<Visit>,
    pub deals: BTreeMap<String, Deal>,
    pub calc_time: u64,
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: Option<u64>,
}

impl PlannedRoute {
    pub fn new(drive_request: impl Into<String>, route: Vec<Visit>, calc_time: u64) -> Self {
        let deals = Deal::collect(&route);
        Self {
            drive_request: drive_request.into(),
            route,
            deals,
            calc_time,
            created_at: calc_time,
            updated_at: None,
        }
    }

    pub fn total_distance(&self) -> f64 {
        self.route.iter().map(|v| v.header().distance).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStatus {
    Ongoing,
    Finished,
    AllDelivered,
    MissingPayments,
}

impl RouteStatus {
    /// Whether a driver still counts as busy with this route
    pub fn is_active(&self) -> bool {
        matches!(self, RouteStatus::Ongoing | RouteStatus::Finished | RouteStatus::MissingPayments)
    }
}

impl fmt::Display for RouteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RouteStatus::Ongoing => "ongoing",
            RouteStatus::Finished => "finished",
            RouteStatus::AllDelivered => "all_delivered",
            RouteStatus::MissingPayments => "missing_payments",
        };
        write!(f, "{s}")
    }
}

/// A visit of an ongoing route plus its execution state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteVisit {
    pub visit: Visit,
    pub visited_status: VisitedStatus,
    /// Id of the persisted completion record
    #[serde(default)]
    pub visited: Option<String>,
}

/// Settlement references of a closed deal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedDeal {
    pub seller_payment_ref: String,
    pub driver_payment_ref: String,
    pub closed_at: u64,
    /// Seller stock and buyers released for this deal
    #[serde(default)]
    pub rebalanced: bool,
}

/// A claimed route. The visit sequence is fixed; only execution state changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OngoingRoute {
    pub id: String,
    pub drive_request: String,
    pub route: Vec<RouteVisit>,
    pub deals: BTreeMap<String, Deal>,
    pub status: RouteStatus,
    pub calc_time: u64,
    pub created_at: u64,
    pub due: u64,
    /// Deals already settled, keyed by seller name
    #[serde(default)]
    pub completed_sell_requests: BTreeMap<String, ClosedDeal>,
    /// Delivery indexes whose payment is still outstanding
    #[serde(default)]
    pub dues: Vec<usize>,
    #[serde(default)]
    pub finished_time: Option<u64>,
    #[serde(default)]
    pub wrapup: Option<String>,
}

impl OngoingRoute {
    pub fn from_planned(id: impl Into<String>, planned: PlannedRoute, now: u64, due: u64) -> Self {
        Self {
            id: id.into(),
            drive_request: planned.drive_request,
            route: planned
                .route
                .into_iter()
                .map(|visit| RouteVisit {
                    visit,
                    visited_status: VisitedStatus::Pending,
                    visited: None,
                })
                .collect(),
            deals: planned.deals,
            status: RouteStatus::Ongoing,
            calc_time: planned.calc_time,
            created_at: now,
            due,
            completed_sell_requests: BTreeMap::new(),
            dues: Vec::new(),
            finished_time: None,
            wrapup: None,
        }
    }

    /// Indexes of non-withdrawn visits that are not yet completed
    pub fn pending_visits(&self) -> Vec<usize> {
        self.route
            .iter()
            .enumerate()
            .filter(|(_, rv)| {
                !matches!(
                    rv.visited_status,
                    VisitedStatus::Completed | VisitedStatus::Withdrawn
                )
            })
            .map(|(i, _)| i)
            .collect()
    }

    pub fn count(&self, kind: VisitKind) -> usize {
        self.route.iter().filter(|rv| rv.visit.kind() == kind).count()
    }

    pub fn total_distance(&self) -> f64 {
        self.route.iter().map(|rv| rv.visit.header().distance).sum()
    }
}

/// Summary stored once per wrapped-up route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrapUpSummary {
    pub id: String,
    pub ongoing_route: String,
    pub drive_request: String,
    pub total_income_from_sales_paid: Decimal,
    pub number_of_deliveries: usize,
    pub number_of_pickups: usize,
    pub total_distance: f64,
    pub began: u64,
    pub ended: u64,
    pub duration_secs: u64,
    pub calc_time: u64,
}
