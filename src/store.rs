use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlPool;
use sqlx::{MySql, QueryBuilder};
use tracing::info;

use crate::error::Result;
use crate::models::Listing;

/// Key-based access to the persisted seen set. The pipeline only ever checks
/// key existence, inserts whole records, and refreshes last-seen timestamps;
/// every failure surfaces to the caller.
#[async_trait]
pub trait ListingStore: Send + Sync {
    /// Which of `ids` the store already knows. One batched query per cycle.
    async fn existing_ids(&self, ids: &[u64]) -> Result<HashSet<u64>>;

    async fn insert(&self, listings: &[Listing]) -> Result<()>;

    async fn touch_last_seen(&self, ids: &[u64], seen_at: DateTime<Utc>) -> Result<()>;
}

/// MySQL-backed store over the operators' existing `Ad` table.
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    /// Connect and run a probe query, so a bad DSN fails at startup rather
    /// than on the first crawl cycle.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = MySqlPool::connect(database_url).await?;
        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl ListingStore for MySqlStore {
    async fn existing_ids(&self, ids: &[u64]) -> Result<HashSet<u64>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        let mut query = QueryBuilder::<MySql>::new("SELECT PathID FROM Ad WHERE PathID IN (");
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        query.push(")");

        let known: Vec<u64> = query.build_query_scalar().fetch_all(&self.pool).await?;
        Ok(known.into_iter().collect())
    }

    async fn insert(&self, listings: &[Listing]) -> Result<()> {
        if listings.is_empty() {
            return Ok(());
        }

        let mut query = QueryBuilder::<MySql>::new(
            "INSERT INTO Ad (Title, Price, Size, Year, Floors, Description, Url, Path, PathID, DateFound) ",
        );
        query.push_values(listings, |mut row, listing| {
            row.push_bind(&listing.title)
                .push_bind(&listing.price)
                .push_bind(&listing.size)
                .push_bind(&listing.year)
                .push_bind(&listing.floors)
                .push_bind(&listing.description)
                .push_bind(&listing.url)
                .push_bind(&listing.path)
                .push_bind(listing.external_id)
                .push_bind(listing.scraped_at);
        });
        query.build().execute(&self.pool).await?;

        info!("Inserted {} listings", listings.len());
        Ok(())
    }

    async fn touch_last_seen(&self, ids: &[u64], seen_at: DateTime<Utc>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut query = QueryBuilder::<MySql>::new("UPDATE Ad SET DateLastSeen = ");
        query.push_bind(seen_at);
        query.push(" WHERE PathID IN (");
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        query.push(")");

        query.build().execute(&self.pool).await?;
        Ok(())
    }
}
