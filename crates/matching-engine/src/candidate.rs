use firewood_types::{DriveRequest, Location, SellRequest};
use std::cmp::Ordering;

use crate::DistanceProvider;

/// Something that can be matched against: has a unique name and a location
pub trait Placed {
    fn name(&self) -> &str;
    fn location(&self) -> &Location;
}

impl Placed for SellRequest {
    fn name(&self) -> &str {
        &self.name
    }

    fn location(&self) -> &Location {
        &self.location
    }
}

impl Placed for DriveRequest {
    fn name(&self) -> &str {
        &self.name
    }

    fn location(&self) -> &Location {
        &self.location
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope<'a> {
    /// Only candidates sharing this postcode
    Postcode(&'a str),
    /// Every candidate in the pool (the pool is one county)
    County,
}

impl SearchScope<'_> {
    fn admits(&self, location: &Location) -> bool {
        match self {
            SearchScope::Postcode(postcode) => location.postcode == *postcode,
            SearchScope::County => true,
        }
    }
}

/// Chosen candidate: index into the pool and its distance from the origin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub index: usize,
    pub distance: f64,
}

/// Pick the best candidate in `scope`.
///
/// Candidates failing `has_capacity` are dropped. Survivors are ordered by
/// `load_key` (lowest first), then by distance from `origin`, then by name
/// so the choice is stable across runs.
pub fn find_candidate<T, C, K>(
    pool: &[T],
    scope: SearchScope<'_>,
    origin: &Location,
    distance: &dyn DistanceProvider,
    has_capacity: C,
    load_key: K,
) -> Option<Candidate>
where
    T: Placed,
    C: Fn(&T) -> bool,
    K: Fn(&T) -> u32,
{
    pool.iter()
        .enumerate()
        .filter(|(_, item)| scope.admits(item.location()) && has_capacity(item))
        .map(|(index, item)| {
            let d = distance.distance(origin, item.location());
            (index, load_key(item), d, item.name())
        })
        .min_by(|a, b| {
            a.1.cmp(&b.1)
                .then_with(|| a.2.total_cmp(&b.2))
                .then_with(|| a.3.cmp(b.3))
        })
        .map(|(index, _, distance, _)| Candidate { index, distance })
}

/// Search the origin's own postcode first, then widen to the whole pool
pub fn find_local_then_county<T, C, K>(
    pool: &[T],
    origin: &Location,
    distance: &dyn DistanceProvider,
    has_capacity: C,
    load_key: K,
) -> Option<Candidate>
where
    T: Placed,
    C: Fn(&T) -> bool,
    K: Fn(&T) -> u32,
{
    find_candidate(
        pool,
        SearchScope::Postcode(&origin.postcode),
        origin,
        distance,
        &has_capacity,
        &load_key,
    )
    .or_else(|| {
        find_candidate(
            pool,
            SearchScope::County,
            origin,
            distance,
            &has_capacity,
            &load_key,
        )
    })
}

/// Order by distance, then name
pub(crate) fn nearest_first(a: (f64, &str), b: (f64, &str)) -> Ordering {
    a.0.total_cmp(&b.0).then_with(|| a.1.cmp(b.1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HaversineDistance;

    fn create_test_seller(name: &str, lat: f64, postcode: &str, num_staged: u32) -> SellRequest {
        let mut seller = SellRequest::new(
            name,
            Location::new(name, lat, 10.0, postcode, "Vestfold"),
            10,
        );
        seller.num_staged = num_staged;
        seller
    }

    fn origin(postcode: &str) -> Location {
        Location::new("buyer", 59.0, 10.0, postcode, "Vestfold")
    }

    #[test]
    fn test_prefers_lower_load_over_distance() {
        let pool = vec![
            create_test_seller("near", 59.01, "3185", 2),
            create_test_seller("far", 59.20, "3185", 1),
        ];

        let found = find_candidate(
            &pool,
            SearchScope::County,
            &origin("3185"),
            &HaversineDistance,
            |_| true,
            |s: &SellRequest| s.num_staged,
        )
        .unwrap();
        assert_eq!(pool[found.index].name, "far");
    }

    #[test]
    fn test_equal_load_prefers_nearest() {
        let pool = vec![
            create_test_seller("far", 59.20, "3185", 0),
            create_test_seller("near", 59.01, "3185", 0),
        ];

        let found = find_candidate(
            &pool,
            SearchScope::County,
            &origin("3185"),
            &HaversineDistance,
            |_| true,
            |s: &SellRequest| s.num_staged,
        )
        .unwrap();
        assert_eq!(pool[found.index].name, "near");
        assert!(found.distance > 0.0);
    }

    #[test]
    fn test_capacity_filter_and_scope() {
        let pool = vec![
            create_test_seller("local-full", 59.01, "3185", 0),
            create_test_seller("remote", 59.30, "3200", 5),
        ];

        let local = find_candidate(
            &pool,
            SearchScope::Postcode("3185"),
            &origin("3185"),
            &HaversineDistance,
            |s: &SellRequest| s.name != "local-full",
            |s: &SellRequest| s.num_staged,
        );
        assert!(local.is_none());

        let found = find_local_then_county(
            &pool,
            &origin("3185"),
            &HaversineDistance,
            |s: &SellRequest| s.name != "local-full",
            |s: &SellRequest| s.num_staged,
        )
        .unwrap();
        assert_eq!(pool[found.index].name, "remote");
    }

    #[test]
    fn test_local_wins_even_if_loaded() {
        let pool = vec![
            create_test_seller("local", 59.05, "3185", 4),
            create_test_seller("county", 59.02, "3200", 0),
        ];

        let found = find_local_then_county(
            &pool,
            &origin("3185"),
            &HaversineDistance,
            |_| true,
            |s: &SellRequest| s.num_staged,
        )
        .unwrap();
        assert_eq!(pool[found.index].name, "local");
    }

    #[test]
    fn test_name_breaks_exact_ties() {
        let pool = vec![
            create_test_seller("b", 59.1, "3185", 0),
            create_test_seller("a", 59.1, "3185", 0),
        ];

        let found = find_candidate(
            &pool,
            SearchScope::County,
            &origin("3185"),
            &HaversineDistance,
            |_| true,
            |s: &SellRequest| s.num_staged,
        )
        .unwrap();
        assert_eq!(pool[found.index].name, "a");
    }
}
