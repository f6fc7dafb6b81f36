//! SQLite-backed campaign store using sqlx.
//!
//! The campaign row and its remaining targets live in two tables; every
//! trait method runs in one transaction so the counter and the target set
//! never disagree.

use {
    async_trait::async_trait,
    sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, sqlite::SqlitePoolOptions},
};

use crate::{
    Context, Result,
    store::CampaignStore,
    types::{BroadcastPayload, Campaign, CampaignSlot, ClaimedTarget, TargetId},
};

/// Rows per multi-row insert, well under SQLite's bind parameter limit.
const INSERT_CHUNK: usize = 500;

pub struct SqliteCampaignStore {
    pool: SqlitePool,
}

impl SqliteCampaignStore {
    /// Create a store with its own connection pool and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("failed to connect to SQLite")?;

        crate::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Create a store using an existing pool (migrations must already be run).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn campaign_from_row(row: &sqlx::sqlite::SqliteRow, targets: Vec<i64>) -> Result<Campaign> {
    let payload: String = row.get("payload");
    let payload: BroadcastPayload = serde_json::from_str(&payload)?;
    Ok(Campaign {
        id: row.get("id"),
        payload,
        targets: targets.into_iter().map(TargetId).collect(),
        total_targets: row.get::<i64, _>("total_targets") as u64,
        delivered_count: row.get::<i64, _>("delivered_count") as u64,
        created_at_ms: row.get::<i64, _>("created_at_ms") as u64,
    })
}

#[async_trait]
impl CampaignStore for SqliteCampaignStore {
    async fn replace(&self, campaign: &Campaign) -> Result<()> {
        let payload = serde_json::to_string(&campaign.payload)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM broadcast_targets")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM broadcast_campaigns")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO broadcast_campaigns
                (slot, id, payload, total_targets, delivered_count, created_at_ms)
             VALUES (1, ?, ?, ?, ?, ?)",
        )
        .bind(&campaign.id)
        .bind(&payload)
        .bind(campaign.total_targets as i64)
        .bind(campaign.delivered_count as i64)
        .bind(campaign.created_at_ms as i64)
        .execute(&mut *tx)
        .await?;

        let targets: Vec<TargetId> = campaign.targets.iter().copied().collect();
        for chunk in targets.chunks(INSERT_CHUNK) {
            let mut insert: QueryBuilder<'_, Sqlite> =
                QueryBuilder::new("INSERT INTO broadcast_targets (campaign_id, target_id) ");
            insert.push_values(chunk, |mut row, target| {
                row.push_bind(campaign.id.as_str()).push_bind(target.0);
            });
            insert.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn slot(&self) -> Result<CampaignSlot> {
        let mut tx = self.pool.begin().await?;
        let Some(row) = sqlx::query(
            "SELECT id, payload, total_targets, delivered_count, created_at_ms
             FROM broadcast_campaigns WHERE slot = 1",
        )
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(CampaignSlot::Empty);
        };

        let id: String = row.get("id");
        let targets: Vec<i64> =
            sqlx::query_scalar("SELECT target_id FROM broadcast_targets WHERE campaign_id = ?")
                .bind(&id)
                .fetch_all(&mut *tx)
                .await?;
        tx.commit().await?;

        Ok(CampaignSlot::Active(campaign_from_row(&row, targets)?))
    }

    async fn contains(&self, target: TargetId) -> Result<bool> {
        let hit: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM broadcast_targets WHERE target_id = ?)",
        )
        .bind(target.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(hit)
    }

    async fn claim(&self, target: TargetId) -> Result<Option<ClaimedTarget>> {
        // Writing first takes the write lock up front, so concurrent claims
        // queue on the busy timeout instead of failing a lock upgrade.
        let mut tx = self.pool.begin().await?;
        let Some(campaign_id) = sqlx::query_scalar::<_, String>(
            "DELETE FROM broadcast_targets WHERE target_id = ? RETURNING campaign_id",
        )
        .bind(target.0)
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(None);
        };

        let Some(row) = sqlx::query(
            "UPDATE broadcast_campaigns SET delivered_count = delivered_count + 1
             WHERE id = ?
             RETURNING payload, delivered_count, total_targets",
        )
        .bind(&campaign_id)
        .fetch_optional(&mut *tx)
        .await?
        else {
            // Orphaned target row; leave it for the next replace.
            return Ok(None);
        };
        tx.commit().await?;

        let payload: String = row.get("payload");
        let delivered_count = row.get::<i64, _>("delivered_count") as u64;
        let total_targets = row.get::<i64, _>("total_targets") as u64;
        Ok(Some(ClaimedTarget {
            campaign_id,
            payload: serde_json::from_str(&payload)?,
            delivered_count,
            remaining: total_targets.saturating_sub(delivered_count),
        }))
    }

    async fn take(&self) -> Result<CampaignSlot> {
        let mut tx = self.pool.begin().await?;
        let Some(row) = sqlx::query(
            "DELETE FROM broadcast_campaigns
             RETURNING id, payload, total_targets, delivered_count, created_at_ms",
        )
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(CampaignSlot::Empty);
        };

        let targets: Vec<i64> =
            sqlx::query_scalar("DELETE FROM broadcast_targets RETURNING target_id")
                .fetch_all(&mut *tx)
                .await?;
        tx.commit().await?;

        Ok(CampaignSlot::Active(campaign_from_row(&row, targets)?))
    }
}
