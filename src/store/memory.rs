//! In-Memory Usage Ledger
//!
//! Process-local ledger backed by a single `RwLock`. Each operation runs
//! entirely under the write lock, which makes `reserve` indivisible.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{
    day_bounds, utc_day, Entity, EntityId, EntityProfile, NewSubscription, RecordId, Result,
    StoreError, Subscription, Tier, UsageLedger, UsageRecord,
};

#[derive(Debug, Default)]
struct LedgerState {
    entities: HashMap<EntityId, Entity>,
    usage: BTreeMap<RecordId, UsageRecord>,
    subscriptions: Vec<Subscription>,
    next_record_id: RecordId,
    next_subscription_id: i64,
}

impl LedgerState {
    fn require_entity(&self, id: EntityId) -> Result<()> {
        if self.entities.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("entity {id}")))
        }
    }

    fn count_on(&self, id: EntityId, day: NaiveDate) -> usize {
        let (start, end) = day_bounds(day);
        self.usage
            .values()
            .filter(|r| r.entity_id == id && r.created_at >= start && r.created_at < end)
            .count()
    }

    fn insert_usage(&mut self, id: EntityId, resource_ref: &str, now: DateTime<Utc>) -> UsageRecord {
        self.next_record_id += 1;
        let record = UsageRecord {
            id: self.next_record_id,
            entity_id: id,
            resource_ref: resource_ref.to_string(),
            created_at: now,
        };
        self.usage.insert(record.id, record.clone());
        record
    }
}

/// In-memory ledger
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl MemoryLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Total usage records across all entities and days
    pub async fn usage_len(&self) -> usize {
        self.state.read().await.usage.len()
    }

    /// All usage records of one entity, oldest first
    pub async fn usage_for(&self, id: EntityId) -> Vec<UsageRecord> {
        let state = self.state.read().await;
        state
            .usage
            .values()
            .filter(|r| r.entity_id == id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl UsageLedger for MemoryLedger {
    async fn upsert_entity(
        &self,
        id: EntityId,
        profile: &EntityProfile,
        now: DateTime<Utc>,
    ) -> Result<Entity> {
        let mut state = self.state.write().await;
        let entity = state.entities.entry(id).or_insert_with(|| Entity {
            id,
            tier: Tier::Free,
            profile: EntityProfile::default(),
            created_at: now,
        });

        if profile.username.is_some() {
            entity.profile.username = profile.username.clone();
        }
        if profile.full_name.is_some() {
            entity.profile.full_name = profile.full_name.clone();
        }
        if profile.language_code.is_some() {
            entity.profile.language_code = profile.language_code.clone();
        }

        Ok(entity.clone())
    }

    async fn get_entity(&self, id: EntityId) -> Result<Option<Entity>> {
        Ok(self.state.read().await.entities.get(&id).cloned())
    }

    async fn set_tier(&self, id: EntityId, tier: Tier) -> Result<()> {
        let mut state = self.state.write().await;
        match state.entities.get_mut(&id) {
            Some(entity) => {
                entity.tier = tier;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("entity {id}"))),
        }
    }

    async fn count_usage(&self, id: EntityId, day: NaiveDate) -> Result<u32> {
        let state = self.state.read().await;
        Ok(state.count_on(id, day) as u32)
    }

    async fn reserve(
        &self,
        id: EntityId,
        resource_ref: &str,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<UsageRecord>> {
        let mut state = self.state.write().await;
        state.require_entity(id)?;

        if state.count_on(id, utc_day(now)) >= limit as usize {
            return Ok(None);
        }

        Ok(Some(state.insert_usage(id, resource_ref, now)))
    }

    async fn record_usage(
        &self,
        id: EntityId,
        resource_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<UsageRecord> {
        let mut state = self.state.write().await;
        state.require_entity(id)?;
        Ok(state.insert_usage(id, resource_ref, now))
    }

    async fn delete_usage(&self, record_id: RecordId) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state.usage.remove(&record_id).is_some())
    }

    async fn find_active_subscription(
        &self,
        id: EntityId,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .iter()
            .filter(|s| s.entity_id == id && s.is_active_at(now))
            .max_by_key(|s| s.expires_at)
            .cloned())
    }

    async fn create_subscription(&self, new: NewSubscription) -> Result<Subscription> {
        let mut state = self.state.write().await;
        match state.entities.get_mut(&new.entity_id) {
            Some(entity) => entity.tier = Tier::Premium,
            None => return Err(StoreError::NotFound(format!("entity {}", new.entity_id))),
        }

        state.next_subscription_id += 1;
        let subscription = Subscription {
            id: state.next_subscription_id,
            entity_id: new.entity_id,
            starts_at: new.starts_at,
            expires_at: new.expires_at,
            amount: new.amount,
            payment_ref: new.payment_ref,
        };
        state.subscriptions.push(subscription.clone());
        Ok(subscription)
    }

    async fn count_payment_ref(&self, payment_ref: &str) -> Result<u32> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .iter()
            .filter(|s| s.payment_ref == payment_ref)
            .count() as u32)
    }
}
