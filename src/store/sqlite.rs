//! SQLite Usage Ledger
//!
//! sqlx-backed ledger. `reserve` is a single `INSERT ... SELECT ... WHERE`
//! statement, so the daily count and the insert are evaluated atomically by
//! SQLite, including across processes sharing the database file.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;

use super::{
    day_bounds, utc_day, Entity, EntityId, EntityProfile, NewSubscription, RecordId, Result,
    StoreError, Subscription, Tier, UsageLedger, UsageRecord,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS entities (
        id INTEGER PRIMARY KEY,
        tier TEXT NOT NULL DEFAULT 'free',
        username TEXT,
        full_name TEXT,
        language_code TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS subscriptions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_id INTEGER NOT NULL REFERENCES entities(id),
        starts_at TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        amount INTEGER NOT NULL,
        payment_ref TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_subscriptions_entity_expiry ON subscriptions (entity_id, expires_at)",
    r#"
    CREATE TABLE IF NOT EXISTS usage_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_id INTEGER NOT NULL REFERENCES entities(id),
        resource_ref TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_usage_entity_created ON usage_records (entity_id, created_at)",
];

/// How long a writer waits for another connection's write lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type EntityRow = (i64, String, Option<String>, Option<String>, Option<String>, String);
type SubscriptionRow = (i64, i64, String, String, i64, String);

fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Internal(format!("invalid timestamp {raw:?}: {e}")))
}

fn entity_from_row(row: EntityRow) -> Result<Entity> {
    let (id, tier, username, full_name, language_code, created_at) = row;
    Ok(Entity {
        id,
        tier: Tier::from_str(&tier).map_err(StoreError::Internal)?,
        profile: EntityProfile {
            username,
            full_name,
            language_code,
        },
        created_at: decode_ts(&created_at)?,
    })
}

fn subscription_from_row(row: SubscriptionRow) -> Result<Subscription> {
    let (id, entity_id, starts_at, expires_at, amount, payment_ref) = row;
    Ok(Subscription {
        id,
        entity_id,
        starts_at: decode_ts(&starts_at)?,
        expires_at: decode_ts(&expires_at)?,
        amount,
        payment_ref,
    })
}

/// SQLite-backed ledger
#[derive(Debug, Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `database_url` and apply the schema
    ///
    /// # Arguments
    /// * `database_url` - SQLite connection string (e.g., "sqlite:data/jobgate.db")
    #[tracing::instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::Internal(format!("Invalid database URL: {e}")))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT)
            .create_if_missing(true);

        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    StoreError::Internal(format!(
                        "failed to create database directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let pool = SqlitePool::connect_with(options).await?;
        let ledger = Self::new(pool);
        ledger.migrate().await?;

        tracing::debug!("usage ledger ready");
        Ok(ledger)
    }

    /// Private in-memory database on a single connection
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Internal(format!("Invalid database URL: {e}")))?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let ledger = Self::new(pool);
        ledger.migrate().await?;
        Ok(ledger)
    }

    /// Create tables and indexes if they do not exist
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl UsageLedger for SqliteLedger {
    #[tracing::instrument(skip(self, profile))]
    async fn upsert_entity(
        &self,
        id: EntityId,
        profile: &EntityProfile,
        now: DateTime<Utc>,
    ) -> Result<Entity> {
        sqlx::query(
            r#"
            INSERT INTO entities (id, tier, username, full_name, language_code, created_at)
            VALUES (?, 'free', ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                username = COALESCE(excluded.username, entities.username),
                full_name = COALESCE(excluded.full_name, entities.full_name),
                language_code = COALESCE(excluded.language_code, entities.language_code)
            "#,
        )
        .bind(id)
        .bind(&profile.username)
        .bind(&profile.full_name)
        .bind(&profile.language_code)
        .bind(encode_ts(now))
        .execute(&self.pool)
        .await?;

        self.get_entity(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("entity {id}")))
    }

    #[tracing::instrument(skip(self))]
    async fn get_entity(&self, id: EntityId) -> Result<Option<Entity>> {
        let row = sqlx::query_as::<_, EntityRow>(
            "SELECT id, tier, username, full_name, language_code, created_at FROM entities WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(entity_from_row).transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn set_tier(&self, id: EntityId, tier: Tier) -> Result<()> {
        let result = sqlx::query("UPDATE entities SET tier = ? WHERE id = ?")
            .bind(tier.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("entity {id}")));
        }

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn count_usage(&self, id: EntityId, day: NaiveDate) -> Result<u32> {
        let (start, end) = day_bounds(day);
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM usage_records WHERE entity_id = ? AND created_at >= ? AND created_at < ?",
        )
        .bind(id)
        .bind(encode_ts(start))
        .bind(encode_ts(end))
        .fetch_one(&self.pool)
        .await?;

        Ok(count as u32)
    }

    #[tracing::instrument(skip(self))]
    async fn reserve(
        &self,
        id: EntityId,
        resource_ref: &str,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<UsageRecord>> {
        let (start, end) = day_bounds(utc_day(now));
        let created_at = encode_ts(now);

        let record_id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO usage_records (entity_id, resource_ref, created_at)
            SELECT ?, ?, ?
            WHERE (
                SELECT COUNT(*) FROM usage_records
                WHERE entity_id = ? AND created_at >= ? AND created_at < ?
            ) < ?
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(resource_ref)
        .bind(&created_at)
        .bind(id)
        .bind(encode_ts(start))
        .bind(encode_ts(end))
        .bind(i64::from(limit))
        .fetch_optional(&self.pool)
        .await?;

        Ok(record_id.map(|record_id| UsageRecord {
            id: record_id,
            entity_id: id,
            resource_ref: resource_ref.to_string(),
            created_at: now,
        }))
    }

    #[tracing::instrument(skip(self))]
    async fn record_usage(
        &self,
        id: EntityId,
        resource_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<UsageRecord> {
        let record_id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO usage_records (entity_id, resource_ref, created_at) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(id)
        .bind(resource_ref)
        .bind(encode_ts(now))
        .fetch_one(&self.pool)
        .await?;

        Ok(UsageRecord {
            id: record_id,
            entity_id: id,
            resource_ref: resource_ref.to_string(),
            created_at: now,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn delete_usage(&self, record_id: RecordId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM usage_records WHERE id = ?")
            .bind(record_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn find_active_subscription(
        &self,
        id: EntityId,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT id, entity_id, starts_at, expires_at, amount, payment_ref
            FROM subscriptions
            WHERE entity_id = ? AND expires_at > ?
            ORDER BY expires_at DESC
            LIMIT 1
            "#,
        )
        .bind(id)
        .bind(encode_ts(now))
        .fetch_optional(&self.pool)
        .await?;

        row.map(subscription_from_row).transpose()
    }

    #[tracing::instrument(skip(self, new), fields(entity_id = new.entity_id))]
    async fn create_subscription(&self, new: NewSubscription) -> Result<Subscription> {
        let mut tx = self.pool.begin().await?;

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO subscriptions (entity_id, starts_at, expires_at, amount, payment_ref, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(new.entity_id)
        .bind(encode_ts(new.starts_at))
        .bind(encode_ts(new.expires_at))
        .bind(new.amount)
        .bind(&new.payment_ref)
        .bind(encode_ts(Utc::now()))
        .fetch_one(&mut *tx)
        .await?;

        let updated = sqlx::query("UPDATE entities SET tier = ? WHERE id = ?")
            .bind(Tier::Premium.as_str())
            .bind(new.entity_id)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("entity {}", new.entity_id)));
        }

        tx.commit().await?;

        Ok(Subscription {
            id,
            entity_id: new.entity_id,
            starts_at: new.starts_at,
            expires_at: new.expires_at,
            amount: new.amount,
            payment_ref: new.payment_ref,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn count_payment_ref(&self, payment_ref: &str) -> Result<u32> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM subscriptions WHERE payment_ref = ?")
                .bind(payment_ref)
                .fetch_one(&self.pool)
                .await?;

        Ok(count as u32)
    }
}
