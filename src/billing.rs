//! Premium Billing
//!
//! Invoices for the premium plan, pre-checkout payload validation, and
//! turning a completed payment into a subscription.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::admission::TierResolver;
use crate::config::QuotaConfig;
use crate::store::{self, EntityId, Subscription};

const PAYLOAD_PREFIX: &str = "premium_";
const CURRENCY: &str = "XTR";

/// Invoice offered to an entity for the premium plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub title: String,
    pub description: String,
    pub payload: String,
    pub currency: String,
    pub amount: i64,
}

/// Reason a pre-checkout request is refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentRejection {
    #[error("invalid payment payload: {0}")]
    InvalidPayload(String),

    #[error("payment for entity {expected} made by entity {actual}")]
    EntityMismatch { expected: EntityId, actual: EntityId },
}

/// A payment reported as completed by the payment provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPayment {
    pub entity_id: EntityId,
    /// Provider charge id
    pub payment_ref: String,
    pub amount: i64,
}

pub fn payload_for(entity_id: EntityId) -> String {
    format!("{PAYLOAD_PREFIX}{entity_id}")
}

/// Check that `payload` is `premium_<id>` and that `<id>` is the payer
pub fn validate_payload(payload: &str, payer: EntityId) -> Result<EntityId, PaymentRejection> {
    let target = payload
        .strip_prefix(PAYLOAD_PREFIX)
        .and_then(|id| id.parse::<EntityId>().ok())
        .ok_or_else(|| PaymentRejection::InvalidPayload(payload.to_string()))?;

    if target != payer {
        return Err(PaymentRejection::EntityMismatch {
            expected: target,
            actual: payer,
        });
    }
    Ok(target)
}

#[derive(Clone)]
pub struct Billing {
    tiers: TierResolver,
    plan: QuotaConfig,
}

impl Billing {
    pub fn new(tiers: TierResolver, plan: QuotaConfig) -> Self {
        Self { tiers, plan }
    }

    pub fn invoice(&self, entity_id: EntityId) -> Invoice {
        Invoice {
            title: "Premium - Unlimited downloads".to_string(),
            description: format!(
                "Premium plan for {} days.\nDownload Twitter/X videos without a daily limit.",
                self.plan.premium_duration_days
            ),
            payload: payload_for(entity_id),
            currency: CURRENCY.to_string(),
            amount: self.plan.premium_price,
        }
    }

    /// Activate or renew premium for the paying entity
    pub async fn complete(&self, payment: &CompletedPayment) -> store::Result<Subscription> {
        let subscription = self
            .tiers
            .create_or_renew_subscription(
                payment.entity_id,
                &payment.payment_ref,
                payment.amount,
                self.plan.premium_duration_days,
            )
            .await?;

        info!(
            "Payment OK: entity_id={} amount={} charge_id={}",
            payment.entity_id, payment.amount, payment.payment_ref
        );
        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLedger;
    use chrono::Utc;
    use std::sync::Arc;

    #[test]
    fn test_validate_payload() {
        assert_eq!(validate_payload("premium_111", 111), Ok(111));
        assert_eq!(
            validate_payload("premium_111", 222),
            Err(PaymentRejection::EntityMismatch {
                expected: 111,
                actual: 222
            })
        );
        assert!(matches!(
            validate_payload("bad_payload", 111),
            Err(PaymentRejection::InvalidPayload(_))
        ));
        assert!(matches!(
            validate_payload("premium_", 111),
            Err(PaymentRejection::InvalidPayload(_))
        ));
        assert!(matches!(
            validate_payload("premium_abc", 111),
            Err(PaymentRejection::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_invoice_uses_plan() {
        let billing = Billing::new(
            TierResolver::new(Arc::new(MemoryLedger::new())),
            QuotaConfig::default(),
        );

        let invoice = billing.invoice(555);

        assert_eq!(invoice.payload, "premium_555");
        assert_eq!(invoice.currency, "XTR");
        assert_eq!(invoice.amount, 250);
        assert!(invoice.description.contains("30 days"));
    }

    #[tokio::test]
    async fn test_complete_grants_premium() {
        let tiers = TierResolver::new(Arc::new(MemoryLedger::new()));
        let billing = Billing::new(tiers.clone(), QuotaConfig::default());

        let subscription = billing
            .complete(&CompletedPayment {
                entity_id: 9,
                payment_ref: "charge_1".to_string(),
                amount: 250,
            })
            .await
            .unwrap();

        assert!(subscription.expires_at > Utc::now() + chrono::Duration::days(29));
        assert!(tiers.is_privileged(9).await.unwrap());
    }
}
