use firewood_types::{BuyRequest, Relationship, RelationshipKind};
use std::collections::BTreeMap;
use tracing::warn;

use crate::{MatchingEngine, MatchingError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverySource {
    Reservation,
    StagedSell,
}

/// A buyer waiting for bags from a given seller
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryTask {
    pub buyer: BuyRequest,
    pub source: DeliverySource,
}

impl DeliveryTask {
    pub fn bags(&self) -> u32 {
        self.buyer.current_requirement
    }
}

impl MatchingEngine {
    /// Unclaimed deliveries a seller still has to make, ordered by buyer name
    pub async fn pending_deliveries(&self, seller: &str) -> Result<Vec<DeliveryTask>, MatchingError> {
        let mut tasks: BTreeMap<String, DeliveryTask> = BTreeMap::new();

        for (kind, source) in [
            (RelationshipKind::Reservation, DeliverySource::Reservation),
            (RelationshipKind::StagedSell, DeliverySource::StagedSell),
        ] {
            for relationship in self.graph.relationships_to(kind, seller).await? {
                let buyer_name = match &relationship {
                    Relationship::Reservation(r) => &r.buy_request,
                    Relationship::StagedSell(s) => &s.buy_request,
                    Relationship::StagedDrive(_) => continue,
                };
                if tasks.contains_key(buyer_name) {
                    continue;
                }
                let Some(buyer) = self.graph.get_buy_request(buyer_name).await? else {
                    warn!(seller = %seller, buyer = %buyer_name, "Relationship points at missing buyer");
                    continue;
                };
                if buyer.claimed_by_driver || buyer.current_requirement == 0 {
                    continue;
                }
                tasks.insert(buyer.name.clone(), DeliveryTask { buyer, source });
            }
        }

        Ok(tasks.into_values().collect())
    }
}
