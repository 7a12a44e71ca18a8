//! Resource References
//!
//! Extracts a status link from free-form text and normalizes it to a single
//! canonical URL, so that every mirror domain maps to the same resource.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref STATUS_URL: Regex = Regex::new(
        r"https?://(?:www\.)?(?:twitter|x|fxtwitter|vxtwitter)\.com/\w+/status/(\d+)"
    )
    .expect("status url pattern is valid");
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    #[error("no supported status link found")]
    Unsupported,
}

/// Canonical reference to one fetchable resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    status_id: String,
}

impl ResourceRef {
    /// Find the first supported status link in `text`
    pub fn parse(text: &str) -> Result<Self, ResourceError> {
        STATUS_URL
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|id| Self::from_status_id(id.as_str()))
            .ok_or(ResourceError::Unsupported)
    }

    pub fn from_status_id(status_id: impl Into<String>) -> Self {
        Self {
            status_id: status_id.into(),
        }
    }

    pub fn status_id(&self) -> &str {
        &self.status_id
    }

    /// Normalized URL handed to the fetcher and stored in the ledger
    pub fn url(&self) -> String {
        format!("https://x.com/i/status/{}", self.status_id)
    }
}

impl std::str::FromStr for ResourceRef {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url())
    }
}
