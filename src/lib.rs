//! Jobgate Library
//!
//! Per-entity job admission in front of a slow, fallible external fetch:
//! one in-flight job per entity, a global concurrency cap, a daily quota
//! for free entities with compensating rollback, and premium entities that
//! bypass the quota.

pub mod admission;
pub mod billing;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod resource;
pub mod server;
pub mod store;

pub use config::Config;
pub use pipeline::{JobOutcome, JobPipeline};
