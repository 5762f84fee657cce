//! TTL index management.
//!
//! The backing collection expires documents through an index on the
//! `modified` field. The index carries a fixed name so its presence can be
//! detected across restarts. In [`TtlIndexMode::Reconcile`] an index whose
//! expiry no longer matches the configured max age is dropped and rebuilt;
//! [`TtlIndexMode::KeepExisting`] trusts any index with the reserved name.

use std::future::Future;
use std::time::Duration;

use crate::config::TtlIndexMode;
use crate::constants::{MODIFIED_FIELD, TTL_INDEX_NAME};
use crate::error::{Result, SessionError, StoreError, StoreOperation};
use crate::providers::DocumentStore;
use crate::state::IndexSpec;

/// Outcome of [`TtlIndexManager::ensure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlIndexStatus {
    /// TTL management is turned off.
    Disabled,
    /// An index with the reserved name already existed and was kept.
    Present,
    /// The index was created.
    Created,
    /// A stale index was dropped and created with the configured expiry.
    Recreated,
}

/// Ensures the TTL index exists with the configured expiry.
#[derive(Debug, Clone)]
pub struct TtlIndexManager {
    expire_after: Duration,
    mode: TtlIndexMode,
    timeout: Option<Duration>,
}

impl TtlIndexManager {
    /// Manager for an index expiring documents `max_age_secs` after their
    /// `modified` timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Config`] if `max_age_secs` is not positive.
    pub fn new(max_age_secs: i64, mode: TtlIndexMode, timeout: Option<Duration>) -> Result<Self> {
        let seconds = u64::try_from(max_age_secs)
            .ok()
            .filter(|seconds| *seconds > 0)
            .ok_or_else(|| {
                SessionError::Config(format!(
                    "TTL index requires a positive max age, got {max_age_secs}"
                ))
            })?;

        Ok(Self {
            expire_after: Duration::from_secs(seconds),
            mode,
            timeout,
        })
    }

    /// The index this manager maintains.
    #[must_use]
    pub fn spec(&self) -> IndexSpec {
        IndexSpec::ttl(TTL_INDEX_NAME, MODIFIED_FIELD, self.expire_after)
    }

    /// Create the TTL index if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Persistence`] or [`SessionError::Timeout`]
    /// naming the index operation that failed.
    pub async fn ensure<D: DocumentStore>(&self, documents: &D) -> Result<TtlIndexStatus> {
        let indexes = self
            .bounded(StoreOperation::ListIndexes, documents.list_indexes())
            .await?;

        if let Some(existing) = indexes.iter().find(|index| index.name == TTL_INDEX_NAME) {
            if self.mode == TtlIndexMode::KeepExisting || existing.expire_after == Some(self.expire_after) {
                tracing::debug!(index = TTL_INDEX_NAME, "TTL index already present");
                return Ok(TtlIndexStatus::Present);
            }

            tracing::info!(
                index = TTL_INDEX_NAME,
                existing_secs = ?existing.expire_after.map(|d| d.as_secs()),
                configured_secs = self.expire_after.as_secs(),
                "TTL index expiry differs from configuration, recreating"
            );
            self.bounded(StoreOperation::DropIndex, documents.drop_index(TTL_INDEX_NAME))
                .await?;
            self.create(documents).await?;
            return Ok(TtlIndexStatus::Recreated);
        }

        self.create(documents).await?;
        Ok(TtlIndexStatus::Created)
    }

    async fn create<D: DocumentStore>(&self, documents: &D) -> Result<()> {
        let spec = self.spec();
        self.bounded(StoreOperation::CreateIndex, documents.create_index(&spec))
            .await?;
        tracing::info!(
            index = TTL_INDEX_NAME,
            field = MODIFIED_FIELD,
            expire_after_secs = self.expire_after.as_secs(),
            "Created TTL index"
        );
        Ok(())
    }

    async fn bounded<T>(
        &self,
        operation: StoreOperation,
        future: impl Future<Output = std::result::Result<T, StoreError>>,
    ) -> Result<T> {
        crate::store::with_deadline(operation, self.timeout, future).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::MockDocumentStore;

    #[tokio::test]
    async fn test_creates_missing_index() {
        let documents = MockDocumentStore::new();
        let manager = TtlIndexManager::new(3600, TtlIndexMode::Reconcile, None).unwrap();

        assert_eq!(manager.ensure(&documents).await.unwrap(), TtlIndexStatus::Created);

        let indexes = documents.indexes();
        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].name, TTL_INDEX_NAME);
        assert_eq!(indexes[0].field.as_deref(), Some(MODIFIED_FIELD));
        assert_eq!(indexes[0].expire_after, Some(Duration::from_secs(3600)));
        assert!(indexes[0].sparse);
        assert!(indexes[0].background);
    }

    #[tokio::test]
    async fn test_idempotent() {
        let documents = MockDocumentStore::new();
        let manager = TtlIndexManager::new(3600, TtlIndexMode::Reconcile, None).unwrap();

        manager.ensure(&documents).await.unwrap();
        assert_eq!(manager.ensure(&documents).await.unwrap(), TtlIndexStatus::Present);
        assert_eq!(documents.calls(StoreOperation::CreateIndex), 1);
    }

    #[tokio::test]
    async fn test_recreates_stale_expiry() {
        let documents = MockDocumentStore::new();
        TtlIndexManager::new(3600, TtlIndexMode::Reconcile, None)
            .unwrap()
            .ensure(&documents)
            .await
            .unwrap();

        let manager = TtlIndexManager::new(7200, TtlIndexMode::Reconcile, None).unwrap();
        assert_eq!(manager.ensure(&documents).await.unwrap(), TtlIndexStatus::Recreated);
        assert_eq!(
            documents.indexes()[0].expire_after,
            Some(Duration::from_secs(7200))
        );
    }

    #[tokio::test]
    async fn test_keep_existing_ignores_expiry() {
        let documents = MockDocumentStore::new();
        TtlIndexManager::new(3600, TtlIndexMode::Reconcile, None)
            .unwrap()
            .ensure(&documents)
            .await
            .unwrap();

        let manager = TtlIndexManager::new(7200, TtlIndexMode::KeepExisting, None).unwrap();
        assert_eq!(manager.ensure(&documents).await.unwrap(), TtlIndexStatus::Present);
        assert_eq!(
            documents.indexes()[0].expire_after,
            Some(Duration::from_secs(3600))
        );
        assert_eq!(documents.calls(StoreOperation::DropIndex), 0);
    }

    #[tokio::test]
    async fn test_list_failure_names_operation() {
        let documents = MockDocumentStore::new();
        documents.fail(StoreOperation::ListIndexes);
        let manager = TtlIndexManager::new(3600, TtlIndexMode::Reconcile, None).unwrap();

        let err = manager.ensure(&documents).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Persistence {
                operation: StoreOperation::ListIndexes,
                ..
            }
        ));
        assert_eq!(documents.calls(StoreOperation::CreateIndex), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_index_setup_is_bounded() {
        let documents = MockDocumentStore::new();
        documents.set_latency(Some(Duration::from_secs(60)));
        let manager =
            TtlIndexManager::new(3600, TtlIndexMode::Reconcile, Some(Duration::from_secs(1))).unwrap();

        let err = manager.ensure(&documents).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Timeout {
                operation: StoreOperation::ListIndexes,
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_non_positive_max_age() {
        assert!(TtlIndexManager::new(0, TtlIndexMode::Reconcile, None).is_err());
        assert!(TtlIndexManager::new(-5, TtlIndexMode::Reconcile, None).is_err());
    }
}
