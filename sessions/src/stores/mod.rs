//! Document store backends.
//!
//! - **MongoDB** (`mongodb` feature) - one collection per store, TTL index
//!   on `modified`

pub mod mongo;

// Re-exports
pub use mongo::MongoDocumentStore;
