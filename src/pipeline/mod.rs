//! Job Pipeline Module
//!
//! Runs one submission end to end: lock, admit, fetch under a concurrency
//! slot, deliver, then commit or compensate the quota reservation.

pub mod artifact;
pub mod delivery;
pub mod fetch;
pub mod job;
pub mod outcome;
pub mod runner;

pub use artifact::ScopedArtifact;
pub use delivery::{DeliveryError, DeliveryTransport, OutboxDelivery};
pub use fetch::{check_artifact, Artifact, CommandFetcher, FetchError, Fetcher};
pub use job::{Admission, JobId, JobRequest, JobState};
pub use outcome::{FailureKind, JobOutcome};
pub use runner::{AccountStatus, JobPipeline, PipelineSettings};
