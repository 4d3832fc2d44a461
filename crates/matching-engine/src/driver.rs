use firewood_store::GraphStoreExt;
use firewood_types::{DriveRequest, Relationship, RelationshipKind, SellRequest, StagedDrive};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::candidate::{find_candidate, Candidate, SearchScope};
use crate::{Match, MatchReport, MatchStatus, MatchingEngine, MatchingError};

impl MatchingEngine {
    /// Recompute driver ↔ seller pickup bindings for `county`.
    ///
    /// Bindings of drivers that already carry a built route are kept; every
    /// other binding is deleted and recomputed in two passes: first each
    /// seller's own postcode, then the whole county for the leftovers.
    pub async fn assign_drivers(
        &self,
        county: &str,
        calc_time: u64,
    ) -> Result<MatchReport<SellRequest>, MatchingError> {
        let mut report = MatchReport::new(county);
        let drivers = self.graph.drive_requests_in_county(county).await?;

        let mut locked: HashSet<String> = HashSet::new();
        for driver in &drivers {
            if !self.graph.travels_for_driver(&driver.name).await?.is_empty() {
                locked.insert(driver.name.clone());
            }
        }

        let mut kept_sellers: HashSet<String> = HashSet::new();
        for binding in self.graph.staged_drives_in_county(county).await? {
            if locked.contains(&binding.drive_request) {
                kept_sellers.insert(binding.sell_request);
                continue;
            }
            self.graph
                .delete_relationship(RelationshipKind::StagedDrive, &binding.sell_request)
                .await?;
        }

        let mut pool: Vec<DriveRequest> = Vec::new();
        for mut driver in drivers {
            if locked.contains(&driver.name) {
                continue;
            }
            if driver.num_staged_pickups > 0 {
                self.graph.reset_staged_pickups(&driver.name).await?;
                driver.num_staged_pickups = 0;
            }
            if driver.available {
                pool.push(driver);
            }
        }

        let mut sellers: Vec<(SellRequest, u32)> = Vec::new();
        for seller in self.graph.sell_requests_in_county(county).await? {
            if kept_sellers.contains(&seller.name) {
                continue;
            }
            let bags: u32 = self
                .pending_deliveries(&seller.name)
                .await?
                .iter()
                .map(|t| t.bags())
                .sum();
            if bags > 0 {
                sellers.push((seller, bags));
            }
        }

        debug!(
            county = %county,
            sellers = sellers.len(),
            drivers = pool.len(),
            locked = locked.len(),
            "Assigning drivers"
        );

        let mut leftovers = Vec::new();
        for (seller, bags) in sellers {
            let scope = SearchScope::Postcode(&seller.location.postcode);
            match self.nearest_driver(&pool, scope, &seller) {
                Some(found) => {
                    let m = self
                        .bind_driver(&mut pool, found, &seller, bags, calc_time)
                        .await?;
                    report.ok.push(m);
                }
                None => leftovers.push((seller, bags)),
            }
        }

        for (seller, bags) in leftovers {
            match self.nearest_driver(&pool, SearchScope::County, &seller) {
                Some(found) => {
                    let m = self
                        .bind_driver(&mut pool, found, &seller, bags, calc_time)
                        .await?;
                    report.ok.push(m);
                }
                None => report.failed.push(seller),
            }
        }

        info!(
            county = %county,
            assigned = report.ok.len(),
            unassigned = report.failed.len(),
            "Driver assignment done"
        );

        Ok(report)
    }

    fn nearest_driver(
        &self,
        pool: &[DriveRequest],
        scope: SearchScope<'_>,
        seller: &SellRequest,
    ) -> Option<Candidate> {
        find_candidate(
            pool,
            scope,
            &seller.location,
            self.distance.as_ref(),
            |_| true,
            |d: &DriveRequest| d.num_staged_pickups,
        )
    }

    async fn bind_driver(
        &self,
        pool: &mut [DriveRequest],
        found: Candidate,
        seller: &SellRequest,
        bags: u32,
        calc_time: u64,
    ) -> Result<Match, MatchingError> {
        let driver_name = pool[found.index].name.clone();
        let created = self
            .graph
            .create_relationship(Relationship::StagedDrive(StagedDrive {
                drive_request: driver_name.clone(),
                sell_request: seller.name.clone(),
                county: seller.location.county.clone(),
                calc_time,
            }))
            .await?;

        if !created {
            return Ok(Match::new(&seller.name, driver_name, bags, MatchStatus::Existing));
        }

        pool[found.index] = self.graph.update_staged_pickups(&driver_name, 1).await?;
        info!(
            seller = %seller.name,
            driver = %driver_name,
            bags,
            distance = found.distance,
            "Driver assigned"
        );
        Ok(Match::new(&seller.name, driver_name, bags, MatchStatus::New))
    }
}
