use firewood_store::{GraphStoreExt, SellCounterDelta};
use firewood_types::{BuyRequest, Relationship, StagedSell};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::candidate::find_local_then_county;
use crate::{Match, MatchReport, MatchStatus, MatchingEngine, MatchingError};

impl MatchingEngine {
    /// Stage single-cycle sales for non-reserving buyers in `county`.
    ///
    /// Runs after reservations so it only sees capacity left over by them.
    pub async fn match_sales(
        &self,
        county: &str,
        calc_time: u64,
    ) -> Result<MatchReport<BuyRequest>, MatchingError> {
        let mut report = MatchReport::new(county);
        let mut sellers = self.graph.sell_requests_in_county(county).await?;

        let covered: HashMap<String, StagedSell> = self
            .graph
            .staged_sells_in_county(county)
            .await?
            .into_iter()
            .map(|s| (s.buy_request.clone(), s))
            .collect();

        let buyers: Vec<BuyRequest> = self
            .graph
            .buy_requests_in_county(county)
            .await?
            .into_iter()
            .filter(|b| !b.is_reserving() && b.is_due(calc_time, self.config.minimum_age_secs))
            .collect();

        debug!(
            county = %county,
            buyers = buyers.len(),
            sellers = sellers.len(),
            existing = covered.len(),
            "Matching sales"
        );

        for buyer in buyers {
            if let Some(existing) = covered.get(&buyer.name) {
                report.ok.push(Match::new(
                    &buyer.name,
                    &existing.sell_request,
                    existing.staged,
                    MatchStatus::Existing,
                ));
                continue;
            }

            let required = buyer.current_requirement;
            let Some(found) = find_local_then_county(
                &sellers,
                &buyer.location,
                self.distance.as_ref(),
                |s| s.spare_for_sale() >= required,
                |s| s.num_staged,
            ) else {
                report.failed.push(buyer);
                continue;
            };

            let seller_name = sellers[found.index].name.clone();
            match self
                .graph
                .update_sell_counters(&seller_name, SellCounterDelta::stage(required))
                .await
            {
                Ok(updated) => sellers[found.index] = updated,
                Err(e) if e.is_invariant_violation() => {
                    warn!(buyer = %buyer.name, seller = %seller_name, error = %e, "Sale no longer fits");
                    report.failed.push(buyer);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            let created = self
                .graph
                .create_relationship(Relationship::StagedSell(StagedSell {
                    buy_request: buyer.name.clone(),
                    sell_request: seller_name.clone(),
                    county: county.to_string(),
                    calc_time,
                    staged: required,
                }))
                .await?;

            if !created {
                sellers[found.index] = self
                    .graph
                    .update_sell_counters(&seller_name, SellCounterDelta::unstage(required))
                    .await?;
                report.ok.push(Match::new(
                    &buyer.name,
                    &seller_name,
                    required,
                    MatchStatus::Existing,
                ));
                continue;
            }

            info!(
                buyer = %buyer.name,
                seller = %seller_name,
                staged = required,
                distance = found.distance,
                "Sale staged"
            );
            report
                .ok
                .push(Match::new(&buyer.name, &seller_name, required, MatchStatus::New));
        }

        info!(
            county = %county,
            new = report.count(MatchStatus::New),
            existing = report.count(MatchStatus::Existing),
            failed = report.failed.len(),
            "Sale matching done"
        );

        Ok(report)
    }
}
