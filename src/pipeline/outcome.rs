//! Job Outcomes
//!
//! Every terminal pipeline state maps to exactly one [`JobOutcome`]. Expected
//! refusals (`Busy`, `QuotaExceeded`) are ordinary variants, not errors.

use serde::{Deserialize, Serialize};

/// Classified reason a running job failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// The fetched result exceeds the deliverable size
    ResultTooLarge { size_bytes: u64, max_bytes: u64 },
    /// The source could not be fetched
    SourceUnavailable,
    /// The result existed but could not be handed to the transport
    DeliveryError,
    /// The fetcher failed in an unclassified way
    Unknown,
    /// Unexpected failure inside the pipeline itself
    Internal,
}

impl FailureKind {
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::ResultTooLarge { .. } => "result_too_large",
            FailureKind::SourceUnavailable => "source_unavailable",
            FailureKind::DeliveryError => "delivery_error",
            FailureKind::Unknown => "unknown",
            FailureKind::Internal => "internal",
        }
    }
}

/// User-visible result of one submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    /// The result was fetched and delivered
    Delivered {
        job_id: String,
        size_bytes: u64,
        premium: bool,
        elapsed_ms: u64,
    },
    /// The entity already has a job in flight
    Busy,
    /// The entity used up today's allowance
    QuotaExceeded { daily_limit: u32 },
    /// The submitted text holds no supported resource link
    InvalidResource,
    /// The job ran and failed; `rolled_back` tells whether a reservation was returned
    Failed { failure: FailureKind, rolled_back: bool },
}

impl JobOutcome {
    /// Short stable label for metrics and logs
    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Delivered { .. } => "delivered",
            JobOutcome::Busy => "busy",
            JobOutcome::QuotaExceeded { .. } => "quota_exceeded",
            JobOutcome::InvalidResource => "invalid_resource",
            JobOutcome::Failed { failure, .. } => failure.label(),
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, JobOutcome::Delivered { .. })
    }

    /// Message suitable for showing to the requester
    pub fn user_message(&self) -> String {
        match self {
            JobOutcome::Delivered { .. } => "Here is your video.".to_string(),
            JobOutcome::Busy => {
                "You already have a download in progress. Wait for it to finish.".to_string()
            }
            JobOutcome::QuotaExceeded { daily_limit } => format!(
                "You reached your limit of {daily_limit} daily downloads. Subscribe for unlimited downloads."
            ),
            JobOutcome::InvalidResource => "That is not a valid Twitter/X link.".to_string(),
            JobOutcome::Failed { failure, .. } => match failure {
                FailureKind::ResultTooLarge { size_bytes, max_bytes } => format!(
                    "The video is too large ({}MB). The limit is {}MB.",
                    size_bytes / (1024 * 1024),
                    max_bytes / (1024 * 1024)
                ),
                FailureKind::SourceUnavailable => {
                    "Could not download the video. Check that the post contains a video."
                        .to_string()
                }
                FailureKind::DeliveryError => {
                    "Could not send the video. It may be too large for the transport.".to_string()
                }
                FailureKind::Unknown | FailureKind::Internal => {
                    "Unexpected error while downloading the video.".to_string()
                }
            },
        }
    }
}
