//! Job Requests and States

use std::path::{Path, PathBuf};

use crate::resource::ResourceRef;
use crate::store::{EntityId, UsageRecord};

/// Identifier unique among concurrently running jobs
///
/// Derived from the resource and the entity: two entities fetching the same
/// resource get distinct ids, and one entity never runs two jobs at once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(String);

impl JobId {
    pub fn derive(entity_id: EntityId, resource: &ResourceRef) -> Self {
        Self(format!("{}_{}", resource.status_id(), entity_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Input to [`super::JobPipeline::submit`]
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub entity_id: EntityId,
    pub resource: ResourceRef,
    pub job_id: JobId,
}

impl JobRequest {
    pub fn new(entity_id: EntityId, resource: ResourceRef) -> Self {
        let job_id = JobId::derive(entity_id, &resource);
        Self {
            entity_id,
            resource,
            job_id,
        }
    }

    /// Job-unique destination for the fetched artifact
    pub fn destination(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(format!("video_{}.mp4", self.job_id))
    }
}

/// How a job was admitted
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Quota exempt; usage is recorded after success
    Privileged,
    /// Holds one reserved quota unit
    Reserved(UsageRecord),
}

impl Admission {
    pub fn is_privileged(&self) -> bool {
        matches!(self, Admission::Privileged)
    }
}

/// Lifecycle of a submitted job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    LockAcquired,
    Admitted,
    Running,
    Succeeded,
    FailedWithRollback,
    FailedNoRollback,
    Done,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobState::Idle => "idle",
            JobState::LockAcquired => "lock_acquired",
            JobState::Admitted => "admitted",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::FailedWithRollback => "failed_with_rollback",
            JobState::FailedNoRollback => "failed_no_rollback",
            JobState::Done => "done",
        };
        f.write_str(name)
    }
}
