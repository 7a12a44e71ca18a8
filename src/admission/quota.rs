//! Quota Reservation Store
//!
//! Reservation protocol over the usage ledger: a quota unit is taken before
//! the risky job runs and handed back (compensated) if the job fails, so a
//! failed attempt costs nothing.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::store::{utc_day, EntityId, RecordId, Result, UsageLedger, UsageRecord};

/// Result of a reservation attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Reservation {
    /// A quota unit is now held by this record
    Reserved(UsageRecord),
    /// The entity already used its daily allowance; nothing was written
    LimitExceeded,
}

impl Reservation {
    pub fn record(&self) -> Option<&UsageRecord> {
        match self {
            Reservation::Reserved(record) => Some(record),
            Reservation::LimitExceeded => None,
        }
    }
}

/// Atomic check-and-reserve over a [`UsageLedger`]
#[derive(Clone)]
pub struct QuotaReservationStore {
    ledger: Arc<dyn UsageLedger>,
}

impl QuotaReservationStore {
    pub fn new(ledger: Arc<dyn UsageLedger>) -> Self {
        Self { ledger }
    }

    /// Reserve one unit of today's quota for `entity_id`
    pub async fn reserve(
        &self,
        entity_id: EntityId,
        resource_ref: &str,
        daily_limit: u32,
    ) -> Result<Reservation> {
        let reserved = self
            .ledger
            .reserve(entity_id, resource_ref, daily_limit, Utc::now())
            .await?;

        match reserved {
            Some(record) => {
                metrics::QUOTA_RESERVATIONS_TOTAL
                    .with_label_values(&["reserved"])
                    .inc();
                debug!(entity_id, record_id = record.id, "Quota unit reserved");
                Ok(Reservation::Reserved(record))
            }
            None => {
                metrics::QUOTA_RESERVATIONS_TOTAL
                    .with_label_values(&["limit_exceeded"])
                    .inc();
                info!(entity_id, daily_limit, "Daily limit reached");
                Ok(Reservation::LimitExceeded)
            }
        }
    }

    /// Roll back a reservation; unknown ids are ignored
    pub async fn compensate(&self, record_id: RecordId) -> Result<()> {
        if self.ledger.delete_usage(record_id).await? {
            metrics::QUOTA_COMPENSATIONS_TOTAL.inc();
            debug!(record_id, "Reservation compensated");
        } else {
            warn!(record_id, "Compensation found no reservation to remove");
        }
        Ok(())
    }

    /// Record usage without a limit check (privileged accounting)
    pub async fn finalize(&self, entity_id: EntityId, resource_ref: &str) -> Result<UsageRecord> {
        self.ledger
            .record_usage(entity_id, resource_ref, Utc::now())
            .await
    }

    /// Units consumed today
    pub async fn used_today(&self, entity_id: EntityId) -> Result<u32> {
        self.ledger.count_usage(entity_id, utc_day(Utc::now())).await
    }
}
