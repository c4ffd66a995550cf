//! # tagsync-core
//!
//! Core types, traits, and reconciliation primitives for tagsync.
//!
//! This crate provides the tag representations and converters, the local
//! reconciler, canonical document creation, and the store/schema traits
//! that the other tagsync crates build on.

pub mod config;
pub mod creation;
pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod path;
pub mod reconcile;
pub mod tags;
pub mod traits;

// Re-export commonly used types at crate root
pub use config::{ConfigAdvisory, FieldConfig, FieldOptions, ReferenceSource};
pub use creation::{create_reference_document, default_check_valid, slugify, PathsHook};
pub use error::{Error, Result};
pub use events::{EventBus, StoreEvent};
pub use models::*;
pub use reconcile::{identity_key, is_dangling, reconcile, Reconciled};
pub use tags::{
    document_to_tag, prepare_tag, prepare_tags, prepare_tags_as_list, prepare_value_as_list,
    revert_tag, revert_tags,
};
pub use traits::*;
