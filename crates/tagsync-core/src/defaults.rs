//! Centralized default constants for tagsync.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own.

// =============================================================================
// TAG SHAPE
// =============================================================================

/// Default path of a tag's human-readable label.
pub const LABEL_PATH: &str = "label";

/// Default path of a tag's value.
pub const VALUE_PATH: &str = "value";

/// `_type` written on every refined (and object raw) tag.
pub const REFINED_TAG_TYPE: &str = "tag";

/// `_type` of a reference raw tag.
pub const REFERENCE_TAG_TYPE: &str = "reference";

/// Schema field type name that marks a slug field.
pub const SLUG_FIELD_TYPE: &str = "slug";

// =============================================================================
// EVENTS
// =============================================================================

/// Broadcast channel capacity for store change events and scheduler events.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// SCHEDULER
// =============================================================================

/// Maximum number of sweeps running at once (different keys only).
pub const SCHEDULER_MAX_CONCURRENT: usize = 2;

/// Capacity of the scheduler's submission queue.
pub const SCHEDULER_QUEUE_CAPACITY: usize = 64;

/// Number of finished job statuses retained for lookups.
pub const SCHEDULER_STATUS_RETENTION: usize = 512;

// =============================================================================
// HTTP STORE
// =============================================================================

/// Default dataset name.
pub const STORE_DATASET: &str = "production";

/// Default query/mutate API version.
pub const STORE_API_VERSION: &str = "2021-10-21";

/// Default HTTP request timeout in seconds.
pub const STORE_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// FIELD
// =============================================================================

/// Default time a field waits for feeds and sweeps to settle, in milliseconds.
pub const FIELD_SETTLE_TIMEOUT_MS: u64 = 10_000;
