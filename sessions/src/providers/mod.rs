//! Provider traits for external dependencies.
//!
//! The session store reaches its database only through [`DocumentStore`].
//! Implementations:
//!
//! - `MockDocumentStore`: in-memory, for tests (feature `test-utils`)
//! - `MongoDocumentStore`: MongoDB (feature `mongodb`)

use std::future::Future;

use crate::error::StoreError;
use crate::state::{IndexSpec, PersistedDocument, SessionId};

/// Document store capability.
///
/// One logical collection keyed by [`SessionId`]. Handles are shared across
/// requests, so implementations must be safe for concurrent use.
///
/// # Implementation Notes
///
/// - `upsert` must be a single-document atomic insert-or-replace and must
///   succeed when no document exists yet
/// - `delete_one` on a missing document is not an error
/// - Timeouts are applied by the caller; implementations may block for as
///   long as their driver does
pub trait DocumentStore: Send + Sync {
    /// Find the document with `id`.
    ///
    /// # Returns
    ///
    /// `None` if no such document exists.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be queried.
    fn find_one(
        &self,
        id: &SessionId,
    ) -> impl Future<Output = Result<Option<PersistedDocument>, StoreError>> + Send;

    /// Insert `document`, or replace the existing document with the same id.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    fn upsert(
        &self,
        document: &PersistedDocument,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Delete the document with `id`.
    ///
    /// # Returns
    ///
    /// `true` if a document was removed.
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails.
    fn delete_one(&self, id: &SessionId) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Describe the indexes on the collection.
    ///
    /// # Errors
    ///
    /// Returns error if indexes cannot be listed.
    fn list_indexes(&self) -> impl Future<Output = Result<Vec<IndexSpec>, StoreError>> + Send;

    /// Create an index.
    ///
    /// # Errors
    ///
    /// Returns error if the index cannot be created.
    fn create_index(&self, spec: &IndexSpec) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Drop the index called `name`.
    ///
    /// # Errors
    ///
    /// Returns error if the index cannot be dropped.
    fn drop_index(&self, name: &str) -> impl Future<Output = Result<(), StoreError>> + Send;
}
