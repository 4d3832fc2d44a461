use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::failed::{FailedMatch, FailedMatchKind, FailedMatchStore};
use crate::StoreError;

// ═══════════════════════════════════════════════════════════════════════════
// SQLITE FAILED-MATCH LEDGER
// ═══════════════════════════════════════════════════════════════════════════

pub struct SqliteFailedMatchStore {
    pool: SqlitePool,
}

impl SqliteFailedMatchStore {
    /// Open (or create) the ledger at the given database path
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePool::connect(&url)
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Create an in-memory SQLite database (for testing)
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(include_str!("../migrations/001_create_failed_matches.sql"))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        sqlx::query(include_str!("../migrations/002_create_failed_matches_index.sql"))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    fn row_to_failed_match(row: &sqlx::sqlite::SqliteRow) -> Result<FailedMatch, StoreError> {
        let kind: String = row.get("kind");
        Ok(FailedMatch {
            kind: kind.parse()?,
            name: row.get("name"),
            county: row.get("county"),
            attempts: row.get::<i64, _>("attempts") as u32,
            first_failed_at: row.get::<i64, _>("first_failed_at") as u64,
            last_failed_at: row.get::<i64, _>("last_failed_at") as u64,
            next_retry_at: row.get::<i64, _>("next_retry_at") as u64,
        })
    }
}

#[async_trait]
impl FailedMatchStore for SqliteFailedMatchStore {
    async fn get(
        &self,
        kind: FailedMatchKind,
        name: &str,
    ) -> Result<Option<FailedMatch>, StoreError> {
        let row = sqlx::query("SELECT * FROM failed_matches WHERE kind = ? AND name = ?")
            .bind(kind.to_string())
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        row.as_ref().map(Self::row_to_failed_match).transpose()
    }

    async fn upsert(&self, entry: &FailedMatch) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO failed_matches (
                kind, name, county, attempts, first_failed_at, last_failed_at, next_retry_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (kind, name) DO UPDATE SET
                county = excluded.county,
                attempts = excluded.attempts,
                last_failed_at = excluded.last_failed_at,
                next_retry_at = excluded.next_retry_at
            "#,
        )
        .bind(entry.kind.to_string())
        .bind(&entry.name)
        .bind(&entry.county)
        .bind(entry.attempts as i64)
        .bind(entry.first_failed_at as i64)
        .bind(entry.last_failed_at as i64)
        .bind(entry.next_retry_at as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn remove(&self, kind: FailedMatchKind, name: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM failed_matches WHERE kind = ? AND name = ?")
            .bind(kind.to_string())
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(
        &self,
        kind: FailedMatchKind,
        county: Option<&str>,
    ) -> Result<Vec<FailedMatch>, StoreError> {
        let rows = match county {
            Some(county) => {
                sqlx::query(
                    "SELECT * FROM failed_matches WHERE kind = ? AND county = ? ORDER BY name",
                )
                .bind(kind.to_string())
                .bind(county)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT * FROM failed_matches WHERE kind = ? ORDER BY name")
                    .bind(kind.to_string())
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        rows.iter().map(Self::row_to_failed_match).collect()
    }
}
