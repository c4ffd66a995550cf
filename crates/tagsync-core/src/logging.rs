//! Structured logging schema for tagsync.
//!
//! All crates log through `tracing` with the same field names so log
//! aggregation can follow a sweep from the field that requested it, through
//! the scheduler, down to the store commit.
//!
//! ## Field names
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `subsystem` | One of the [`subsystem`] values |
//! | `component` | One of the [`component`] values |
//! | `document_id` | Document being read or patched |
//! | `document_type` | Host document type of a tag field |
//! | `field_path` | Dotted path of the tag field |
//! | `reference_type` | Canonical (reference source) document type |
//! | `job_id` | Scheduler job UUID |
//! | `patched` / `examined` | Sweep counters |
//! | `duration_ms` | Wall-clock duration |
//! | `error` | Error message when an operation fails |
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Sweep or creation failure, requires operator attention |
//! | WARN  | Recoverable issue: feed failure, config advisory, lagged events |
//! | INFO  | Lifecycle events (scheduler start/stop), sweep completions |
//! | DEBUG | Decision points: reconcile skipped, sweep de-duplicated |
//! | TRACE | Per-item iteration (per candidate document, per tag) |

/// Values for the `subsystem` field.
pub mod subsystem {
    pub const CORE: &str = "core";
    pub const STORE: &str = "store";
    pub const JOBS: &str = "jobs";
    pub const FIELD: &str = "field";
    pub const CLI: &str = "cli";
}

/// Values for the `component` field.
pub mod component {
    pub const CONVERTER: &str = "converter";
    pub const CREATION: &str = "creation";
    pub const SWEEP: &str = "sweep";
    pub const SCHEDULER: &str = "scheduler";
    pub const FEED: &str = "feed";
    pub const COORDINATOR: &str = "coordinator";
    pub const FIELD: &str = "field";
    pub const MEMORY_STORE: &str = "memory_store";
    pub const HTTP_STORE: &str = "http_store";
}
