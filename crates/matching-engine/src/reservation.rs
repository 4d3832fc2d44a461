use firewood_store::{BuyRequestUpdate, GraphStoreExt, SellCounterDelta, StoreError};
use firewood_types::{BuyRequest, Relationship, Reservation};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::candidate::find_local_then_county;
use crate::{Match, MatchReport, MatchStatus, MatchingEngine, MatchingError};

impl MatchingEngine {
    /// Bind reserving buyers in `county` to sellers.
    ///
    /// Order per buyer: existing reservation, sticky target, own postcode,
    /// whole county. Buyers with nowhere to go land in `failed`.
    pub async fn match_reservations(
        &self,
        county: &str,
        calc_time: u64,
    ) -> Result<MatchReport<BuyRequest>, MatchingError> {
        let mut report = MatchReport::new(county);
        let mut sellers = self.graph.sell_requests_in_county(county).await?;

        let covered: HashMap<String, Reservation> = self
            .graph
            .reservations_in_county(county)
            .await?
            .into_iter()
            .map(|r| (r.buy_request.clone(), r))
            .collect();

        let buyers: Vec<BuyRequest> = self
            .graph
            .buy_requests_in_county(county)
            .await?
            .into_iter()
            .filter(|b| b.is_reserving() && b.is_due(calc_time, self.config.minimum_age_secs))
            .collect();

        debug!(
            county = %county,
            buyers = buyers.len(),
            sellers = sellers.len(),
            existing = covered.len(),
            "Matching reservations"
        );

        for buyer in buyers {
            if let Some(existing) = covered.get(&buyer.name) {
                report.ok.push(Match::new(
                    &buyer.name,
                    &existing.sell_request,
                    existing.reserved,
                    MatchStatus::Existing,
                ));
                continue;
            }

            let required = buyer.required_reserve_amount();

            if let Some(target) = buyer.reserve_target.as_deref() {
                if sellers.iter().any(|s| s.name == target) {
                    let status = self
                        .bind_reservation(&buyer, target, required, calc_time)
                        .await?;
                    report
                        .ok
                        .push(Match::new(&buyer.name, target, required, status));
                    continue;
                }
                warn!(
                    buyer = %buyer.name,
                    target = %target,
                    "Sticky reservation target gone, searching again"
                );
            }

            let Some(found) = find_local_then_county(
                &sellers,
                &buyer.location,
                self.distance.as_ref(),
                |s| s.spare_for_reservation() >= required,
                |s| s.num_reserved,
            ) else {
                report.failed.push(buyer);
                continue;
            };

            let seller_name = sellers[found.index].name.clone();
            match self
                .graph
                .update_sell_counters(&seller_name, SellCounterDelta::reserve(required))
                .await
            {
                Ok(updated) => sellers[found.index] = updated,
                Err(e) if e.is_invariant_violation() => {
                    warn!(buyer = %buyer.name, seller = %seller_name, error = %e, "Reservation no longer fits");
                    report.failed.push(buyer);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            let created = self
                .graph
                .create_relationship(Relationship::Reservation(Reservation {
                    buy_request: buyer.name.clone(),
                    sell_request: seller_name.clone(),
                    county: county.to_string(),
                    calc_time,
                    reserved: required,
                }))
                .await?;

            if !created {
                // Lost a race with a concurrent run; undo our counters
                let undo = SellCounterDelta {
                    num_reserved: -1,
                    amount_reserved: -i64::from(required),
                    ..Default::default()
                };
                sellers[found.index] = self.graph.update_sell_counters(&seller_name, undo).await?;
                report.ok.push(Match::new(
                    &buyer.name,
                    &seller_name,
                    required,
                    MatchStatus::Existing,
                ));
                continue;
            }

            self.graph
                .update_buy_request(
                    &buyer.name,
                    BuyRequestUpdate::default().reserve_target(Some(seller_name.clone())),
                )
                .await?;

            info!(
                buyer = %buyer.name,
                seller = %seller_name,
                reserved = required,
                distance = found.distance,
                "Reservation created"
            );
            report
                .ok
                .push(Match::new(&buyer.name, &seller_name, required, MatchStatus::New));
        }

        info!(
            county = %county,
            new = report.count(MatchStatus::New),
            sticky = report.count(MatchStatus::Sticky),
            existing = report.count(MatchStatus::Existing),
            failed = report.failed.len(),
            "Reservation matching done"
        );

        Ok(report)
    }

    /// Recreate the reservation edge towards a sticky seller. The remaining
    /// reserved amount is still counted on the seller, so counters stay put.
    async fn bind_reservation(
        &self,
        buyer: &BuyRequest,
        seller: &str,
        reserved: u32,
        calc_time: u64,
    ) -> Result<MatchStatus, StoreError> {
        let created = self
            .graph
            .create_relationship(Relationship::Reservation(Reservation {
                buy_request: buyer.name.clone(),
                sell_request: seller.to_string(),
                county: buyer.location.county.clone(),
                calc_time,
                reserved,
            }))
            .await?;

        if created {
            debug!(buyer = %buyer.name, seller = %seller, "Sticky reservation re-bound");
            Ok(MatchStatus::Sticky)
        } else {
            Ok(MatchStatus::Existing)
        }
    }
}
