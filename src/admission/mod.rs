//! Admission Control Module
//!
//! Gating decisions made before a job is allowed to run.
//!
//! # Features
//!
//! - Non-blocking per-entity mutual exclusion with bounded, self-evicting state
//! - Global cap on simultaneously running jobs
//! - Atomic daily quota reservation with compensation on failure
//! - Subscription-based quota exemption
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Job Pipeline                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐         │
//! │  │ Entity      │  │ Tier        │  │ Concurrency │         │
//! │  │ Locks       │  │ Resolver    │  │ Limiter     │         │
//! │  └─────────────┘  └──────┬──────┘  └─────────────┘         │
//! │                   ┌──────┴──────┐                           │
//! │                   │ Quota       │                           │
//! │                   │ Reservation │                           │
//! │                   └──────┬──────┘                           │
//! ├──────────────────────────┼──────────────────────────────────┤
//! │  ┌───────────────────────┴─────────────────────────────┐   │
//! │  │              Usage Ledger (SQLite / Memory)          │   │
//! │  └─────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod limiter;
pub mod locks;
pub mod quota;
pub mod tier;

pub use limiter::{ConcurrencySlot, GlobalConcurrencyLimiter, LimiterClosed};
pub use locks::{EntityLock, EntityLockRegistry, LockAttempt};
pub use quota::{QuotaReservationStore, Reservation};
pub use tier::TierResolver;
