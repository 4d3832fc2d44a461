use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::Location;

/// A seller's standing offer of firewood bags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellRequest {
    /// Unique key
    pub name: String,

    pub location: Location,

    /// Listed price per bag, if the seller set one
    #[serde(default)]
    pub price: Option<Decimal>,

    /// Bags available to sell
    pub current_capacity: u32,

    /// Bags promised to multi-week reservations
    #[serde(default)]
    pub amount_reserved: u32,

    /// Bags promised to single-cycle sales
    #[serde(default)]
    pub amount_staged: u32,

    #[serde(default)]
    pub num_reserved: u32,

    #[serde(default)]
    pub num_staged: u32,

    /// Bags the seller must have ready for a claimed pickup
    #[serde(default)]
    pub prepare_for_pickup: u32,
}

impl SellRequest {
    pub fn new(name: impl Into<String>, location: Location, current_capacity: u32) -> Self {
        Self {
            name: name.into(),
            location,
            price: None,
            current_capacity,
            amount_reserved: 0,
            amount_staged: 0,
            num_reserved: 0,
            num_staged: 0,
            prepare_for_pickup: 0,
        }
    }

    pub fn with_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    pub fn county(&self) -> &str {
        &self.location.county
    }

    /// Capacity not yet promised to reservations
    pub fn spare_for_reservation(&self) -> u32 {
        self.current_capacity.saturating_sub(self.amount_reserved)
    }

    /// Capacity not yet promised to reservations or staged sales
    pub fn spare_for_sale(&self) -> u32 {
        self.current_capacity
            .saturating_sub(self.amount_reserved)
            .saturating_sub(self.amount_staged)
    }

    pub fn is_within_capacity(&self) -> bool {
        u64::from(self.amount_reserved) + u64::from(self.amount_staged)
            <= u64::from(self.current_capacity)
    }
}

/// A buyer's demand for bags this cycle, optionally reserved for several weeks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyRequest {
    pub name: String,

    pub location: Location,

    /// Bags needed per delivery
    pub current_requirement: u32,

    /// Remaining reservation weeks; zero means an ordinary sale
    #[serde(default)]
    pub reserved_weeks: u32,

    /// Sticky seller once a reservation has been made
    #[serde(default)]
    pub reserve_target: Option<String>,

    /// Locked by a claimed route
    #[serde(default)]
    pub claimed_by_driver: bool,

    /// Last time this buyer was served or recalculated (unix seconds)
    #[serde(default)]
    pub last_calced: u64,
}

impl BuyRequest {
    pub fn new(name: impl Into<String>, location: Location, current_requirement: u32) -> Self {
        Self {
            name: name.into(),
            location,
            current_requirement,
            reserved_weeks: 0,
            reserve_target: None,
            claimed_by_driver: false,
            last_calced: 0,
        }
    }

    pub fn with_reservation(mut self, weeks: u32) -> Self {
        self.reserved_weeks = weeks;
        self
    }

    pub fn county(&self) -> &str {
        &self.location.county
    }

    pub fn is_reserving(&self) -> bool {
        self.reserved_weeks > 0
    }

    /// Capacity a reservation would hold on a seller
    pub fn required_reserve_amount(&self) -> u32 {
        self.reserved_weeks.saturating_mul(self.current_requirement)
    }

    /// Whether the buyer may enter a matching round at `calc_time`
    pub fn is_due(&self, calc_time: u64, minimum_age_secs: u64) -> bool {
        !self.claimed_by_driver
            && self.current_requirement > 0
            && calc_time.saturating_sub(self.last_calced) >= minimum_age_secs
    }
}

/// A driver offering pickup and delivery capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveRequest {
    pub name: String,

    /// Home location, where every route starts
    pub location: Location,

    #[serde(default)]
    pub num_staged_pickups: u32,

    pub available: bool,

    /// Unix seconds when a quarantined driver may work again; zero when not quarantined
    #[serde(default)]
    pub available_again_time: u64,
}

impl DriveRequest {
    pub fn new(name: impl Into<String>, location: Location) -> Self {
        Self {
            name: name.into(),
            location,
            num_staged_pickups: 0,
            available: true,
            available_again_time: 0,
        }
    }

    pub fn county(&self) -> &str {
        &self.location.county
    }

    pub fn quarantine_over(&self, now: u64) -> bool {
        !self.available && self.available_again_time > 0 && self.available_again_time <= now
    }
}

/// Contact details of the user owning a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContact {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
}

impl UserContact {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            phone: None,
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }
}
