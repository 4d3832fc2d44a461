use serde::{Deserialize, Serialize};

/// A geocoded address. Every request node in the graph hangs off one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Address label, unique per node
    pub name: String,

    /// Latitude in degrees
    pub lat: f64,

    /// Longitude in degrees
    pub lng: f64,

    pub postcode: String,

    pub county: String,
}

impl Location {
    pub fn new(
        name: impl Into<String>,
        lat: f64,
        lng: f64,
        postcode: impl Into<String>,
        county: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            lat,
            lng,
            postcode: postcode.into(),
            county: county.into(),
        }
    }

    pub fn same_postcode(&self, other: &Location) -> bool {
        self.postcode == other.postcode
    }
}
