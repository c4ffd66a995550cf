//! # tagsync-field
//!
//! The headless counterpart of a tag input control.
//!
//! A [`TagField`] loads its selection and option groups through
//! [`feeds`], keeps the selection consistent with the canonical documents,
//! and writes changes back to the host document. Local reconciliation and
//! the bulk sweeps it submits to the scheduler never race: the
//! [`Coordinator`] suppresses the former while a sweep is in flight.
//!
//! ## Example
//!
//! ```ignore
//! use tagsync_field::{FieldContext, TagField};
//!
//! let mut field = TagField::builder(store, scheduler, FieldContext::new("p1", "post", "tags"))
//!     .config(config)
//!     .mount(stored_value);
//! field.settle().await?;
//!
//! field.handle_create("Rust").await?;
//! field.teardown();
//! ```

pub mod coordinator;
pub mod feeds;
pub mod field;

pub use coordinator::{Coordinator, CoordinatorState};
pub use feeds::{spawn_feed, FeedHandle, FeedKind, FeedSource, FeedUpdate};
pub use field::{
    CheckValid, FieldActivity, FieldContext, FieldHooks, OptionView, TagField, TagFieldBuilder,
};
