//! Result Delivery
//!
//! Hands a fetched artifact to the requester. The pipeline calls
//! [`DeliveryTransport::deliver`] exactly once per successful fetch and
//! deletes the local artifact afterwards regardless of the result.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

use super::fetch::Artifact;
use super::job::JobRequest;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("delivery I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("delivery rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn deliver(&self, request: &JobRequest, artifact: &Artifact) -> Result<(), DeliveryError>;
}

/// Delivers by copying into `<outbox>/<entity_id>/<job_id>.mp4`
#[derive(Debug, Clone)]
pub struct OutboxDelivery {
    outbox_dir: PathBuf,
}

impl OutboxDelivery {
    pub fn new(outbox_dir: impl Into<PathBuf>) -> Self {
        Self {
            outbox_dir: outbox_dir.into(),
        }
    }

    pub fn path_for(&self, request: &JobRequest) -> PathBuf {
        self.outbox_dir
            .join(request.entity_id.to_string())
            .join(format!("{}.mp4", request.job_id))
    }
}

#[async_trait]
impl DeliveryTransport for OutboxDelivery {
    async fn deliver(&self, request: &JobRequest, artifact: &Artifact) -> Result<(), DeliveryError> {
        let target = self.path_for(request);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let copied = tokio::fs::copy(&artifact.path, &target).await?;
        if copied != artifact.size_bytes {
            return Err(DeliveryError::Rejected(format!(
                "short copy: {copied} of {} bytes",
                artifact.size_bytes
            )));
        }

        debug!("Delivered {} to {}", request.job_id, target.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceRef;

    #[tokio::test]
    async fn test_outbox_delivery_copies_artifact() {
        let work = tempfile::tempdir().unwrap();
        let outbox = tempfile::tempdir().unwrap();
        let source = work.path().join("video.mp4");
        std::fs::write(&source, b"payload").unwrap();

        let delivery = OutboxDelivery::new(outbox.path());
        let request = JobRequest::new(7, ResourceRef::from_status_id("123"));
        let artifact = Artifact {
            path: source,
            size_bytes: 7,
        };

        delivery.deliver(&request, &artifact).await.unwrap();

        let delivered = std::fs::read(delivery.path_for(&request)).unwrap();
        assert_eq!(delivered, b"payload");
    }

    #[tokio::test]
    async fn test_missing_artifact_is_io_error() {
        let outbox = tempfile::tempdir().unwrap();
        let delivery = OutboxDelivery::new(outbox.path());
        let request = JobRequest::new(7, ResourceRef::from_status_id("123"));
        let artifact = Artifact {
            path: outbox.path().join("missing.mp4"),
            size_bytes: 1,
        };

        let err = delivery.deliver(&request, &artifact).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Io(_)));
    }
}
