//! Mock document store for testing.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{StoreError, StoreOperation};
use crate::providers::DocumentStore;
use crate::state::{IndexSpec, PersistedDocument, SessionId};

#[derive(Debug, Default)]
struct Inner {
    documents: HashMap<SessionId, PersistedDocument>,
    indexes: Vec<IndexSpec>,
    failing: HashSet<StoreOperation>,
    calls: HashMap<StoreOperation, usize>,
    latency: Option<Duration>,
}

/// Mock document store.
///
/// Uses in-memory storage. Operations can be made to fail or stall so tests
/// can exercise error and timeout paths, and every call is counted.
#[derive(Debug, Clone, Default)]
pub struct MockDocumentStore {
    inner: Arc<Mutex<Inner>>,
}

impl MockDocumentStore {
    /// Create an empty mock store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `operation` fail with [`StoreError::Unavailable`] until
    /// [`MockDocumentStore::recover`] is called.
    pub fn fail(&self, operation: StoreOperation) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failing.insert(operation);
        }
    }

    /// Clear all injected failures.
    pub fn recover(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failing.clear();
        }
    }

    /// Delay every operation by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.latency = latency;
        }
    }

    /// Number of documents stored.
    #[must_use]
    pub fn document_count(&self) -> usize {
        self.inner.lock().map(|inner| inner.documents.len()).unwrap_or(0)
    }

    /// Stored document with `id`, bypassing failure injection.
    #[must_use]
    pub fn document(&self, id: &SessionId) -> Option<PersistedDocument> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.documents.get(id).cloned())
    }

    /// Insert a document directly, bypassing failure injection.
    pub fn insert_document(&self, document: PersistedDocument) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.documents.insert(document.id, document);
        }
    }

    /// Indexes currently defined.
    #[must_use]
    pub fn indexes(&self) -> Vec<IndexSpec> {
        self.inner
            .lock()
            .map(|inner| inner.indexes.clone())
            .unwrap_or_default()
    }

    /// Number of times `operation` was attempted.
    #[must_use]
    pub fn calls(&self, operation: StoreOperation) -> usize {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.calls.get(&operation).copied())
            .unwrap_or(0)
    }

    /// Wait for the configured latency, then run `f` under the lock.
    fn run<T, F>(&self, operation: StoreOperation, f: F) -> impl Future<Output = Result<T, StoreError>> + Send
    where
        T: Send,
        F: FnOnce(&mut Inner) -> Result<T, StoreError> + Send,
    {
        let inner = Arc::clone(&self.inner);

        async move {
            let latency = {
                let mut guard = inner
                    .lock()
                    .map_err(|_| StoreError::Backend("Mutex lock failed".to_string()))?;
                *guard.calls.entry(operation).or_insert(0) += 1;
                guard.latency
            };

            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }

            let mut guard = inner
                .lock()
                .map_err(|_| StoreError::Backend("Mutex lock failed".to_string()))?;
            if guard.failing.contains(&operation) {
                return Err(StoreError::Unavailable(format!(
                    "injected {operation} failure"
                )));
            }
            f(&mut *guard)
        }
    }
}

impl DocumentStore for MockDocumentStore {
    fn find_one(
        &self,
        id: &SessionId,
    ) -> impl Future<Output = Result<Option<PersistedDocument>, StoreError>> + Send {
        let id = *id;
        self.run(StoreOperation::Load, move |inner| {
            Ok(inner.documents.get(&id).cloned())
        })
    }

    fn upsert(
        &self,
        document: &PersistedDocument,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        let document = document.clone();
        self.run(StoreOperation::Save, move |inner| {
            inner.documents.insert(document.id, document);
            Ok(())
        })
    }

    fn delete_one(&self, id: &SessionId) -> impl Future<Output = Result<bool, StoreError>> + Send {
        let id = *id;
        self.run(StoreOperation::Delete, move |inner| {
            Ok(inner.documents.remove(&id).is_some())
        })
    }

    fn list_indexes(&self) -> impl Future<Output = Result<Vec<IndexSpec>, StoreError>> + Send {
        self.run(StoreOperation::ListIndexes, |inner| Ok(inner.indexes.clone()))
    }

    fn create_index(&self, spec: &IndexSpec) -> impl Future<Output = Result<(), StoreError>> + Send {
        let spec = spec.clone();
        self.run(StoreOperation::CreateIndex, move |inner| {
            if inner.indexes.iter().any(|index| index.name == spec.name) {
                return Err(StoreError::Backend(format!(
                    "index {} already exists with different options",
                    spec.name
                )));
            }
            inner.indexes.push(spec);
            Ok(())
        })
    }

    fn drop_index(&self, name: &str) -> impl Future<Output = Result<(), StoreError>> + Send {
        let name = name.to_string();
        self.run(StoreOperation::DropIndex, move |inner| {
            let before = inner.indexes.len();
            inner.indexes.retain(|index| index.name != name);
            if inner.indexes.len() == before {
                return Err(StoreError::Backend(format!("index not found: {name}")));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn document(data: &str) -> PersistedDocument {
        PersistedDocument {
            id: SessionId::new(),
            data: data.to_string(),
            modified: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_and_find() {
        let store = MockDocumentStore::new();
        let doc = document("a");

        store.upsert(&doc).await.unwrap();
        assert_eq!(store.find_one(&doc.id).await.unwrap(), Some(doc.clone()));

        let replaced = PersistedDocument {
            data: "b".to_string(),
            ..doc.clone()
        };
        store.upsert(&replaced).await.unwrap();
        assert_eq!(store.document_count(), 1);
        assert_eq!(store.document(&doc.id).unwrap().data, "b");
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_error() {
        let store = MockDocumentStore::new();
        assert!(!store.delete_one(&SessionId::new()).await.unwrap());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MockDocumentStore::new();
        store.fail(StoreOperation::Load);

        let result = store.find_one(&SessionId::new()).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(store.calls(StoreOperation::Load), 1);

        store.recover();
        assert!(store.find_one(&SessionId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_index_name_rejected() {
        let store = MockDocumentStore::new();
        let spec = IndexSpec::ttl("ttl", "modified", Duration::from_secs(60));
        store.create_index(&spec).await.unwrap();
        assert!(store.create_index(&spec).await.is_err());

        store.drop_index("ttl").await.unwrap();
        assert!(store.indexes().is_empty());
        assert!(store.drop_index("ttl").await.is_err());
    }
}
