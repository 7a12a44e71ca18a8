//! Usage Ledger
//!
//! Persistent record of entities, subscriptions and consumed quota units.
//!
//! The ledger is the only place where quota state lives. Every mutation that
//! the quota invariant depends on (`reserve`, `delete_usage`, `record_usage`)
//! is a single indivisible operation on the backing store, so the invariant
//! holds even across independent process instances sharing one database.
//!
//! Two backends are provided:
//! - [`SqliteLedger`]: sqlx/SQLite, used by the binary
//! - [`MemoryLedger`]: in-process, used by tests and embedders
//!
//! Calendar days are UTC days. Timestamps are persisted as RFC 3339 UTC text
//! with fixed microsecond precision so that lexical order equals time order.

pub mod error;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

pub use error::{Result, StoreError};
pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;

/// Stable identifier of a requester
pub type EntityId = i64;

/// Identifier of a usage record
pub type RecordId = i64;

/// Entitlement class of an entity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Premium,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Premium => "premium",
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "free" => Ok(Tier::Free),
            "premium" => Ok(Tier::Premium),
            _ => Err(format!("unknown tier: {s}")),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display metadata for an entity
///
/// `None` fields leave the stored value untouched on upsert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityProfile {
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub language_code: Option<String>,
}

/// A requester on whose behalf jobs run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub tier: Tier,
    pub profile: EntityProfile,
    pub created_at: DateTime<Utc>,
}

/// A paid entitlement period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub entity_id: EntityId,
    pub starts_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub amount: i64,
    pub payment_ref: String,
}

impl Subscription {
    /// A subscription is valid while its expiry lies in the future
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Insert payload for [`UsageLedger::create_subscription`]
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub entity_id: EntityId,
    pub starts_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub amount: i64,
    pub payment_ref: String,
}

/// One consumed unit of quota
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: RecordId,
    pub entity_id: EntityId,
    pub resource_ref: String,
    pub created_at: DateTime<Utc>,
}

/// Persistent store operations required by the admission layer
#[async_trait]
pub trait UsageLedger: Send + Sync {
    /// Create the entity on first contact, otherwise merge non-empty profile fields
    async fn upsert_entity(
        &self,
        id: EntityId,
        profile: &EntityProfile,
        now: DateTime<Utc>,
    ) -> Result<Entity>;

    async fn get_entity(&self, id: EntityId) -> Result<Option<Entity>>;

    /// Fails with [`StoreError::NotFound`] for unknown entities
    async fn set_tier(&self, id: EntityId, tier: Tier) -> Result<()>;

    /// Number of usage records created by `id` during the UTC `day`
    async fn count_usage(&self, id: EntityId, day: NaiveDate) -> Result<u32>;

    /// Atomically insert a usage record if fewer than `limit` exist for the
    /// UTC day of `now`; returns `None` without inserting otherwise
    async fn reserve(
        &self,
        id: EntityId,
        resource_ref: &str,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<UsageRecord>>;

    /// Unconditional insert
    async fn record_usage(
        &self,
        id: EntityId,
        resource_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<UsageRecord>;

    /// Returns whether a record was removed; a missing id is not an error
    async fn delete_usage(&self, record_id: RecordId) -> Result<bool>;

    /// Active subscription with the latest expiry
    async fn find_active_subscription(
        &self,
        id: EntityId,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>>;

    /// Store a subscription and mark the entity premium in one write
    async fn create_subscription(&self, new: NewSubscription) -> Result<Subscription>;

    /// Number of subscriptions already paid with `payment_ref`
    async fn count_payment_ref(&self, payment_ref: &str) -> Result<u32>;
}

/// UTC calendar day containing `ts`
pub fn utc_day(ts: DateTime<Utc>) -> NaiveDate {
    ts.date_naive()
}

/// Half-open `[start, end)` bounds of a UTC calendar day
pub fn day_bounds(day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = day.and_time(NaiveTime::MIN).and_utc();
    (start, start + Duration::days(1))
}
