use async_trait::async_trait;
use firewood_types::{Relationship, RelationshipKind, Reservation, StagedDrive, StagedSell};

use crate::{GraphStore, StoreError};

/// Page size used when draining a relationship cursor
pub const DEFAULT_PAGE_SIZE: usize = 200;

/// Bulk helpers that drain [`GraphStore::relationships_page`]
#[async_trait]
pub trait GraphStoreExt: GraphStore {
    async fn all_relationships(
        &self,
        kind: RelationshipKind,
        county: &str,
    ) -> Result<Vec<Relationship>, StoreError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .relationships_page(kind, county, cursor.as_deref(), DEFAULT_PAGE_SIZE)
                .await?;
            items.extend(page.items);
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(items)
    }

    async fn reservations_in_county(&self, county: &str) -> Result<Vec<Reservation>, StoreError> {
        Ok(self
            .all_relationships(RelationshipKind::Reservation, county)
            .await?
            .into_iter()
            .filter_map(|r| match r {
                Relationship::Reservation(r) => Some(r),
                _ => None,
            })
            .collect())
    }

    async fn staged_sells_in_county(&self, county: &str) -> Result<Vec<StagedSell>, StoreError> {
        Ok(self
            .all_relationships(RelationshipKind::StagedSell, county)
            .await?
            .into_iter()
            .filter_map(|r| match r {
                Relationship::StagedSell(s) => Some(s),
                _ => None,
            })
            .collect())
    }

    async fn staged_drives_in_county(&self, county: &str) -> Result<Vec<StagedDrive>, StoreError> {
        Ok(self
            .all_relationships(RelationshipKind::StagedDrive, county)
            .await?
            .into_iter()
            .filter_map(|r| match r {
                Relationship::StagedDrive(d) => Some(d),
                _ => None,
            })
            .collect())
    }
}

impl<T: GraphStore + ?Sized> GraphStoreExt for T {}
