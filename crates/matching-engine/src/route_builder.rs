use firewood_store::GraphStoreExt;
use firewood_types::{
    BuyRequest, DriveRequest, Location, SellRequest, StagedDrive, Travel, TravelKind,
    TravelStatus, Visit, VisitHeader,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::candidate::nearest_first;
use crate::{DistanceProvider, MatchingEngine, MatchingError};

/// Built routes keyed by driver name
pub type DriverRoutes = BTreeMap<String, Vec<Visit>>;

/// One seller stop with the deliveries it feeds
#[derive(Debug, Clone)]
pub struct PickupBlock {
    pub seller: SellRequest,
    pub buyers: Vec<BuyRequest>,
}

/// Order pickups and deliveries for one driver.
///
/// Blocks are visited nearest-first from the driver's home; inside a block
/// deliveries follow a greedy nearest-neighbour chain from the pickup.
pub fn plan_route(
    driver: &DriveRequest,
    mut blocks: Vec<PickupBlock>,
    distance: &dyn DistanceProvider,
) -> Result<Vec<Visit>, MatchingError> {
    let home = &driver.location;
    blocks.sort_by(|a, b| {
        nearest_first(
            (distance.distance(home, &a.seller.location), a.seller.name.as_str()),
            (distance.distance(home, &b.seller.location), b.seller.name.as_str()),
        )
    });

    let mut visits = Vec::new();
    let mut position: Location = home.clone();
    let mut cargo: u32 = 0;

    for block in blocks {
        let load: u32 = block.buyers.iter().map(|b| b.current_requirement).sum();
        let header = VisitHeader {
            from: position.clone(),
            to: block.seller.location.clone(),
            distance: distance.distance(&position, &block.seller.location),
            drive_request: driver.name.clone(),
            loaded_before: cargo,
            loaded_after: cargo + load,
        };
        cargo += load;
        position = block.seller.location.clone();
        visits.push(Visit::pickup(header, block.seller.clone())?);

        let mut remaining = block.buyers;
        while !remaining.is_empty() {
            let next = remaining
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    nearest_first(
                        (distance.distance(&position, &a.location), a.name.as_str()),
                        (distance.distance(&position, &b.location), b.name.as_str()),
                    )
                })
                .map(|(i, _)| i)
                .unwrap_or(0);
            let buyer = remaining.swap_remove(next);

            let after = cargo.checked_sub(buyer.current_requirement).ok_or_else(|| {
                MatchingError::CargoUnderflow {
                    driver: driver.name.clone(),
                    buyer: buyer.name.clone(),
                    loaded: cargo,
                    requirement: buyer.current_requirement,
                }
            })?;
            let header = VisitHeader {
                from: position.clone(),
                to: buyer.location.clone(),
                distance: distance.distance(&position, &buyer.location),
                drive_request: driver.name.clone(),
                loaded_before: cargo,
                loaded_after: after,
            };
            cargo = after;
            position = buyer.location.clone();
            visits.push(Visit::delivery(header, block.seller.clone(), buyer)?);
        }
    }

    Ok(visits)
}

fn travel_for(visit: &Visit, calc_time: u64) -> Travel {
    let header = visit.header();
    let kind = match visit {
        Visit::Delivery { .. } => TravelKind::TravelToDeliver,
        _ => TravelKind::TravelToPickup,
    };
    Travel {
        drive_request: header.drive_request.clone(),
        kind,
        from: header.from.clone(),
        to: header.to.clone(),
        counterparty: visit.counterparty().to_string(),
        distance: header.distance,
        loaded_before: header.loaded_before,
        loaded_after: header.loaded_after,
        status: TravelStatus::Planned,
        calc_time,
    }
}

impl MatchingEngine {
    /// Build routes for every driver bound to sellers in `county` and persist
    /// them as travel edges.
    ///
    /// Drivers that already have a route leaving their home are skipped, so
    /// rebuilding never duplicates an unclaimed route.
    pub async fn build_routes(
        &self,
        county: &str,
        calc_time: u64,
    ) -> Result<DriverRoutes, MatchingError> {
        let mut bindings: BTreeMap<String, Vec<StagedDrive>> = BTreeMap::new();
        for binding in self.graph.staged_drives_in_county(county).await? {
            bindings
                .entry(binding.drive_request.clone())
                .or_default()
                .push(binding);
        }

        let mut routes = DriverRoutes::new();
        for (driver_name, driver_bindings) in bindings {
            let driver = self
                .graph
                .get_drive_request(&driver_name)
                .await?
                .ok_or_else(|| MatchingError::MissingEntity {
                    kind: "driveRequest",
                    name: driver_name.clone(),
                })?;

            let has_route = self
                .graph
                .travels_for_driver(&driver.name)
                .await?
                .iter()
                .any(|t| t.kind == TravelKind::TravelToPickup && t.from.name == driver.location.name);
            if has_route {
                debug!(driver = %driver.name, "Route already built, skipping");
                continue;
            }

            let mut blocks = Vec::new();
            for binding in driver_bindings {
                let seller = self
                    .graph
                    .get_sell_request(&binding.sell_request)
                    .await?
                    .ok_or_else(|| MatchingError::MissingEntity {
                        kind: "sellRequest",
                        name: binding.sell_request.clone(),
                    })?;
                let buyers: Vec<BuyRequest> = self
                    .pending_deliveries(&seller.name)
                    .await?
                    .into_iter()
                    .map(|t| t.buyer)
                    .collect();
                if buyers.is_empty() {
                    debug!(driver = %driver.name, seller = %seller.name, "No deliveries for seller");
                    continue;
                }
                blocks.push(PickupBlock { seller, buyers });
            }
            if blocks.is_empty() {
                continue;
            }

            let visits = plan_route(&driver, blocks, self.distance.as_ref())?;
            for visit in &visits {
                self.graph.insert_travel(travel_for(visit, calc_time)).await?;
            }

            info!(
                driver = %driver.name,
                county = %county,
                visits = visits.len(),
                distance = visits.iter().map(|v| v.header().distance).sum::<f64>(),
                "Route built"
            );
            routes.insert(driver.name.clone(), visits);
        }

        Ok(routes)
    }
}
