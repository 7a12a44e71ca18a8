//! Job Pipeline
//!
//! Orchestrates one submission through the admission components and the
//! external fetch:
//!
//! ```text
//! Idle → LockAcquired → Admitted{privileged|reserved} → Running
//!      → Succeeded | FailedWithRollback | FailedNoRollback → Done
//! ```
//!
//! Once the entity lock is taken, the job runs on its own tokio task that
//! owns the lock, the concurrency slot, the local artifact and the quota
//! reservation. Dropping the `submit` future only stops waiting for the
//! outcome. The job still runs to completion, and a failed job still has its
//! reservation compensated before the lock is released. Fetch and delivery
//! run on a nested task, so a panic in either becomes
//! `Failed { Internal }` with the reservation rolled back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::artifact::ScopedArtifact;
use super::delivery::DeliveryTransport;
use super::fetch::{FetchError, Fetcher};
use super::job::{Admission, JobRequest, JobState};
use super::outcome::{FailureKind, JobOutcome};
use crate::admission::{
    EntityLockRegistry, GlobalConcurrencyLimiter, LockAttempt, QuotaReservationStore, Reservation,
    TierResolver,
};
use crate::config::Config;
use crate::metrics;
use crate::resource::ResourceRef;
use crate::store::{self, EntityId, EntityProfile, Tier, UsageLedger};

/// Values the pipeline consumes from configuration
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub daily_free_limit: u32,
    pub max_global_concurrent_jobs: usize,
    pub max_tracked_entities: usize,
    pub work_dir: PathBuf,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            daily_free_limit: 3,
            max_global_concurrent_jobs: 5,
            max_tracked_entities: 1000,
            work_dir: std::env::temp_dir(),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            daily_free_limit: config.quota.daily_free_limit,
            max_global_concurrent_jobs: config.concurrency.max_global_concurrent_jobs,
            max_tracked_entities: config.concurrency.max_tracked_entities,
            work_dir: config.fetch.work_dir(),
        }
    }
}

/// Plan and remaining allowance of one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountStatus {
    pub entity_id: EntityId,
    pub tier: Tier,
    pub used_today: u32,
    /// `None` when unlimited
    pub daily_limit: Option<u32>,
    /// `None` when unlimited
    pub remaining: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Admission and execution of per-entity jobs
///
/// One instance owns the lock registry and the concurrency limiter for the
/// lifetime of the process; share it behind an `Arc`.
pub struct JobPipeline {
    locks: EntityLockRegistry,
    worker: JobWorker,
}

/// Everything a job task needs once its entity lock is held
#[derive(Clone)]
struct JobWorker {
    settings: PipelineSettings,
    limiter: GlobalConcurrencyLimiter,
    quota: QuotaReservationStore,
    tiers: TierResolver,
    fetcher: Arc<dyn Fetcher>,
    delivery: Arc<dyn DeliveryTransport>,
}

impl JobPipeline {
    pub fn new(
        settings: PipelineSettings,
        ledger: Arc<dyn UsageLedger>,
        fetcher: Arc<dyn Fetcher>,
        delivery: Arc<dyn DeliveryTransport>,
    ) -> Self {
        Self {
            locks: EntityLockRegistry::new(settings.max_tracked_entities),
            worker: JobWorker {
                limiter: GlobalConcurrencyLimiter::new(settings.max_global_concurrent_jobs),
                quota: QuotaReservationStore::new(Arc::clone(&ledger)),
                tiers: TierResolver::new(ledger),
                fetcher,
                delivery,
                settings,
            },
        }
    }

    /// Submit a job for the first supported resource link in `text`
    pub async fn submit(&self, entity_id: EntityId, text: &str) -> JobOutcome {
        match ResourceRef::parse(text) {
            Ok(resource) => self.submit_resource(entity_id, resource).await,
            Err(_) => {
                debug!(entity_id, "Rejected submission without a supported link");
                metrics::JOBS_SUBMITTED_TOTAL
                    .with_label_values(&[JobOutcome::InvalidResource.label()])
                    .inc();
                JobOutcome::InvalidResource
            }
        }
    }

    /// Submit a job for an already parsed resource
    pub async fn submit_resource(&self, entity_id: EntityId, resource: ResourceRef) -> JobOutcome {
        let request = JobRequest::new(entity_id, resource);
        let span = info_span!("job", entity_id, job_id = %request.job_id);

        let outcome = self.run(request).instrument(span).await;
        metrics::JOBS_SUBMITTED_TOTAL
            .with_label_values(&[outcome.label()])
            .inc();
        outcome
    }

    async fn run(&self, request: JobRequest) -> JobOutcome {
        let lock = match self.locks.try_acquire(request.entity_id) {
            LockAttempt::Acquired(lock) => lock,
            LockAttempt::Busy => {
                debug!("Entity already has a job in flight");
                return JobOutcome::Busy;
            }
        };
        debug!(state = %JobState::LockAcquired);

        let worker = self.worker.clone();
        let job = tokio::spawn(
            async move {
                let outcome = worker.run_locked(&request).await;
                lock.release();
                debug!(state = %JobState::Done, outcome = outcome.label());
                outcome
            }
            .in_current_span(),
        );

        match job.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Job task failed: {}", e);
                JobOutcome::Failed {
                    failure: FailureKind::Internal,
                    rolled_back: false,
                }
            }
        }
    }

    /// Plan, today's usage and remaining allowance of `entity_id`
    pub async fn status(&self, entity_id: EntityId) -> store::Result<AccountStatus> {
        self.worker
            .tiers
            .register(entity_id, &EntityProfile::default())
            .await?;
        let used_today = self.worker.quota.used_today(entity_id).await?;
        let subscription = self.worker.tiers.active_subscription(entity_id).await?;
        let daily_limit = self.worker.settings.daily_free_limit;

        Ok(match subscription {
            Some(subscription) => AccountStatus {
                entity_id,
                tier: Tier::Premium,
                used_today,
                daily_limit: None,
                remaining: None,
                expires_at: Some(subscription.expires_at),
            },
            None => AccountStatus {
                entity_id,
                tier: Tier::Free,
                used_today,
                daily_limit: Some(daily_limit),
                remaining: Some(daily_limit.saturating_sub(used_today)),
                expires_at: None,
            },
        })
    }

    /// Stop admitting new jobs into the running state
    pub fn shutdown(&self) {
        info!("Closing job pipeline");
        self.worker.limiter.close();
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.worker.settings
    }

    pub fn tiers(&self) -> &TierResolver {
        &self.worker.tiers
    }

    pub fn quota(&self) -> &QuotaReservationStore {
        &self.worker.quota
    }

    pub fn locks(&self) -> &EntityLockRegistry {
        &self.locks
    }

    pub fn limiter(&self) -> &GlobalConcurrencyLimiter {
        &self.worker.limiter
    }
}

impl JobWorker {
    async fn run_locked(&self, request: &JobRequest) -> JobOutcome {
        let started = Instant::now();

        let admission = match self.admit(request).await {
            Ok(Some(admission)) => admission,
            Ok(None) => {
                return JobOutcome::QuotaExceeded {
                    daily_limit: self.settings.daily_free_limit,
                }
            }
            Err(e) => {
                error!("Admission failed: {}", e);
                return JobOutcome::Failed {
                    failure: FailureKind::Internal,
                    rolled_back: false,
                };
            }
        };
        let premium = admission.is_privileged();
        debug!(state = %JobState::Admitted, premium);

        let running = tokio::spawn({
            let worker = self.clone();
            let request = request.clone();
            async move { worker.execute(&request).await }.in_current_span()
        });
        let executed = running.await.unwrap_or_else(|e| {
            error!("Job execution failed: {}", e);
            Err(FailureKind::Internal)
        });

        match executed {
            Ok(size_bytes) => {
                debug!(state = %JobState::Succeeded);
                if premium {
                    if let Err(e) = self
                        .quota
                        .finalize(request.entity_id, &request.resource.url())
                        .await
                    {
                        error!("Failed to record usage: {}", e);
                    }
                }

                let elapsed_ms = started.elapsed().as_millis() as u64;
                info!(
                    size_mb = %format!("{:.1}", size_bytes as f64 / 1024.0 / 1024.0),
                    elapsed_ms, premium, "Download OK"
                );
                JobOutcome::Delivered {
                    job_id: request.job_id.to_string(),
                    size_bytes,
                    premium,
                    elapsed_ms,
                }
            }
            Err(failure) => {
                let (state, rolled_back) = match &admission {
                    Admission::Reserved(record) => {
                        let compensated = match self.quota.compensate(record.id).await {
                            Ok(()) => true,
                            Err(e) => {
                                error!(record_id = record.id, "Failed to compensate reservation: {}", e);
                                false
                            }
                        };
                        (JobState::FailedWithRollback, compensated)
                    }
                    Admission::Privileged => (JobState::FailedNoRollback, false),
                };
                debug!(state = %state, failure = failure.label());
                JobOutcome::Failed {
                    failure,
                    rolled_back,
                }
            }
        }
    }

    /// Classify the entity and take a quota unit when it is not privileged
    async fn admit(&self, request: &JobRequest) -> store::Result<Option<Admission>> {
        self.tiers
            .register(request.entity_id, &EntityProfile::default())
            .await?;

        if self.tiers.is_privileged(request.entity_id).await? {
            return Ok(Some(Admission::Privileged));
        }

        let reservation = self
            .quota
            .reserve(
                request.entity_id,
                &request.resource.url(),
                self.settings.daily_free_limit,
            )
            .await?;

        Ok(match reservation {
            Reservation::Reserved(record) => Some(Admission::Reserved(record)),
            Reservation::LimitExceeded => None,
        })
    }

    /// Fetch under a concurrency slot and deliver; the artifact is removed
    /// before the slot is returned
    async fn execute(&self, request: &JobRequest) -> Result<u64, FailureKind> {
        let _slot = self.limiter.acquire().await.map_err(|e| {
            error!("{}", e);
            FailureKind::Internal
        })?;
        debug!(state = %JobState::Running);

        let destination = ScopedArtifact::new(request.destination(&self.settings.work_dir));
        let fetcher = Arc::clone(&self.fetcher);
        let url = request.resource.url();
        let path = destination.path().to_path_buf();

        let fetch_started = Instant::now();
        let fetched = tokio::task::spawn_blocking(move || fetcher.fetch(&url, &path)).await;
        let fetch_secs = fetch_started.elapsed().as_secs_f64();

        let artifact = match fetched {
            Ok(Ok(artifact)) => {
                metrics::FETCH_DURATION_SECONDS
                    .with_label_values(&["ok"])
                    .observe(fetch_secs);
                artifact
            }
            Ok(Err(e)) => {
                metrics::FETCH_DURATION_SECONDS
                    .with_label_values(&["error"])
                    .observe(fetch_secs);
                return Err(classify(e));
            }
            Err(e) => {
                error!("Fetch task failed: {}", e);
                return Err(FailureKind::Internal);
            }
        };

        let _relocated = (artifact.path != destination.path())
            .then(|| ScopedArtifact::new(artifact.path.clone()));

        self.delivery
            .deliver(request, &artifact)
            .await
            .map_err(|e| {
                error!("Send error: {}", e);
                FailureKind::DeliveryError
            })?;

        Ok(artifact.size_bytes)
    }
}

fn classify(error: FetchError) -> FailureKind {
    match error {
        FetchError::ResultTooLarge {
            size_bytes,
            max_bytes,
        } => {
            warn!(
                size_mb = %format!("{:.1}", size_bytes as f64 / 1024.0 / 1024.0),
                "File too large"
            );
            FailureKind::ResultTooLarge {
                size_bytes,
                max_bytes,
            }
        }
        FetchError::SourceUnavailable(reason) => {
            error!("Download error: {}", reason);
            FailureKind::SourceUnavailable
        }
        FetchError::Unknown(reason) => {
            error!("Unexpected error: {}", reason);
            FailureKind::Unknown
        }
    }
}
