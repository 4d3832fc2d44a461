//! Distance collaborator.
//!
//! Matching and route building only need a symmetric, non-negative and
//! deterministic scalar per location pair. The default provider uses the
//! great-circle distance, which ignores roads but is always available.

use firewood_types::Location;

/// Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

pub trait DistanceProvider: Send + Sync {
    /// Distance between two locations in kilometers
    fn distance(&self, a: &Location, b: &Location) -> f64;
}

/// Great-circle distance provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct HaversineDistance;

impl HaversineDistance {
    pub fn haversine_km(from: (f64, f64), to: (f64, f64)) -> f64 {
        let (lat1, lng1) = from;
        let (lat2, lng2) = to;

        let lat1_rad = lat1.to_radians();
        let lat2_rad = lat2.to_radians();
        let delta_lat = (lat2 - lat1).to_radians();
        let delta_lng = (lng2 - lng1).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();

        EARTH_RADIUS_KM * c
    }
}

impl DistanceProvider for HaversineDistance {
    fn distance(&self, a: &Location, b: &Location) -> f64 {
        Self::haversine_km((a.lat, a.lng), (b.lat, b.lng))
    }
}
