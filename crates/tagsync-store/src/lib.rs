//! # tagsync-store
//!
//! Document store backends for tagsync.
//!
//! - [`MemoryStore`]: in-process store with change events, a call log, and
//!   failure injection.
//! - [`HttpStore`]: client for a query/mutate HTTP API.
//! - [`StaticSchema`]: schema registry loaded from configuration.

pub mod groq;
pub mod http;
pub mod memory;
pub mod schema;

pub use http::{HttpStore, HttpStoreConfig};
pub use memory::{MemoryStore, StoreCall, StoreOperation};
pub use schema::StaticSchema;
