//! Tier Resolver
//!
//! Entity lifecycle and subscription state. An entity is privileged (quota
//! exempt) while it holds a subscription whose expiry lies in the future.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::store::{
    Entity, EntityId, EntityProfile, NewSubscription, Result, Subscription, UsageLedger,
};

#[derive(Clone)]
pub struct TierResolver {
    ledger: Arc<dyn UsageLedger>,
}

impl TierResolver {
    pub fn new(ledger: Arc<dyn UsageLedger>) -> Self {
        Self { ledger }
    }

    /// Create the entity on first contact or refresh its display metadata
    pub async fn register(&self, entity_id: EntityId, profile: &EntityProfile) -> Result<Entity> {
        self.ledger.upsert_entity(entity_id, profile, Utc::now()).await
    }

    pub async fn entity(&self, entity_id: EntityId) -> Result<Option<Entity>> {
        self.ledger.get_entity(entity_id).await
    }

    pub async fn is_privileged(&self, entity_id: EntityId) -> Result<bool> {
        Ok(self.active_subscription(entity_id).await?.is_some())
    }

    pub async fn active_subscription(&self, entity_id: EntityId) -> Result<Option<Subscription>> {
        self.ledger
            .find_active_subscription(entity_id, Utc::now())
            .await
    }

    /// Start a new subscription period of `duration_days` from now
    ///
    /// Payment references are not deduplicated: a replayed payment creates a
    /// second subscription. Replays are logged so the payment layer can act.
    pub async fn create_or_renew_subscription(
        &self,
        entity_id: EntityId,
        payment_ref: &str,
        amount: i64,
        duration_days: u32,
    ) -> Result<Subscription> {
        let now = Utc::now();
        self.ledger
            .upsert_entity(entity_id, &EntityProfile::default(), now)
            .await?;

        let seen = self.ledger.count_payment_ref(payment_ref).await?;
        if seen > 0 {
            warn!(entity_id, payment_ref, seen, "Payment reference already used");
        }

        let subscription = self
            .ledger
            .create_subscription(NewSubscription {
                entity_id,
                starts_at: now,
                expires_at: now + Duration::days(i64::from(duration_days)),
                amount,
                payment_ref: payment_ref.to_string(),
            })
            .await?;

        info!(
            entity_id,
            amount,
            payment_ref,
            expires_at = %subscription.expires_at,
            "Subscription activated"
        );
        Ok(subscription)
    }
}
