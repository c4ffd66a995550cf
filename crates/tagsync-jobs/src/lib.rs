//! # tagsync-jobs
//!
//! Bulk reconciliation for tagsync.
//!
//! This crate provides:
//! - [`sync_references`]: the type-scoped sweep that repairs every host
//!   document whose tags disagree with the canonical documents
//! - [`SweepScheduler`]: a background runner that executes sweeps decoupled
//!   from any field's lifetime, with de-duplication and lifecycle events
//!
//! ## Example
//!
//! ```ignore
//! use tagsync_jobs::{SchedulerConfig, SweepRequest, SweepScheduler};
//!
//! let handle = SweepScheduler::new(store, SchedulerConfig::from_env()).start();
//!
//! let request = SweepRequest::new("post", "tags", "category");
//! let outcome = handle.submit_and_wait(request).await?;
//! println!("patched {} of {}", outcome.patched, outcome.examined);
//!
//! // Graceful shutdown
//! handle.shutdown().await?;
//! ```

pub mod sweep;
pub mod worker;

pub use sweep::{sync_references, SweepKey, SweepOutcome, SweepRequest};
pub use worker::{JobStatus, SchedulerConfig, SchedulerEvent, SchedulerHandle, SweepScheduler};
