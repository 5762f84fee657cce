//! Error types for session operations.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::codec::CodecError;

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Document store operation that failed or timed out.
///
/// Used to prefix persistence errors so callers can tell a failed load from a
/// failed save or index setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    /// `find_one` during session load.
    Load,
    /// `upsert` during session save.
    Save,
    /// `delete_one` during session save with a non-positive max age.
    Delete,
    /// `list_indexes` during TTL index setup.
    ListIndexes,
    /// `create_index` during TTL index setup.
    CreateIndex,
    /// `drop_index` during TTL index reconciliation.
    DropIndex,
}

impl StoreOperation {
    /// Short name used in log fields and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Save => "save",
            Self::Delete => "delete",
            Self::ListIndexes => "list indexes",
            Self::CreateIndex => "create index",
            Self::DropIndex => "drop index",
        }
    }

    /// Returns `true` for operations that belong to TTL index management.
    #[must_use]
    pub const fn is_index_operation(self) -> bool {
        matches!(self, Self::ListIndexes | Self::CreateIndex | Self::DropIndex)
    }
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a [`DocumentStore`](crate::providers::DocumentStore)
/// implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing database could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backing database rejected the operation.
    #[error("store backend error: {0}")]
    Backend(String),

    /// A document could not be converted to or from its stored form.
    #[error("document serialization error: {0}")]
    Serialization(String),
}

/// Errors surfaced by the session store.
///
/// Only two conditions are never reported: an absent cookie (the session is
/// simply new) and a missing document (the session is treated as new).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    // ═══════════════════════════════════════════════════════════
    // Transport-adjacent Errors
    // ═══════════════════════════════════════════════════════════

    /// The request cookie was present but could not be decoded.
    ///
    /// Covers tampering, corruption, expiry and cookies signed with a key
    /// that is no longer configured. A fresh session is still returned.
    #[error("session cookie decode failed: {0}")]
    CookieDecode(CodecError),

    /// The response sink refused the cookie.
    #[error("session cookie write failed: {0}")]
    CookieWrite(String),

    // ═══════════════════════════════════════════════════════════
    // Persistence Errors
    // ═══════════════════════════════════════════════════════════

    /// The stored record could not be fetched or its data could not be decoded.
    #[error("session record load failed: {reason}")]
    RecordLoad {
        /// What went wrong
        reason: String,
    },

    /// A document store operation failed.
    #[error("session {operation} failed: {source}")]
    Persistence {
        /// The failing operation
        operation: StoreOperation,
        /// Error reported by the store
        source: StoreError,
    },

    /// A document store operation exceeded its deadline.
    #[error("session {operation} timed out after {after:?}")]
    Timeout {
        /// The operation that timed out
        operation: StoreOperation,
        /// The deadline that was exceeded
        after: Duration,
    },

    /// Session values or id could not be encoded on save.
    #[error("session encode failed: {0}")]
    Encode(CodecError),

    // ═══════════════════════════════════════════════════════════
    // Semantic Errors
    // ═══════════════════════════════════════════════════════════

    /// The session id is not a valid identifier.
    #[error("invalid session identifier: {0:?}")]
    InvalidIdentifier(String),

    /// The reserved `modified` value is not a timestamp.
    #[error("invalid modified value: expected timestamp, found {found}")]
    InvalidModifiedValue {
        /// Type tag of the value actually stored
        found: &'static str,
    },

    // ═══════════════════════════════════════════════════════════
    // Initialization Errors
    // ═══════════════════════════════════════════════════════════

    /// The store configuration or key material is invalid.
    #[error("invalid session store configuration: {0}")]
    Config(String),
}

impl SessionError {
    /// Wraps a store failure with the operation that produced it.
    #[must_use]
    pub const fn persistence(operation: StoreOperation, source: StoreError) -> Self {
        Self::Persistence { operation, source }
    }

    /// Returns `true` if the caller can reasonably continue with a fresh
    /// session instead of failing the request.
    ///
    /// # Examples
    ///
    /// ```
    /// # use docstore_sessions::{SessionError, CodecError};
    /// assert!(SessionError::CookieDecode(CodecError::MacMismatch).is_recoverable());
    /// assert!(!SessionError::InvalidIdentifier("zz".into()).is_recoverable());
    /// ```
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::CookieDecode(_))
    }

    /// Returns `true` if the error originated in the document store,
    /// including timeouts.
    #[must_use]
    pub const fn is_store_failure(&self) -> bool {
        matches!(
            self,
            Self::Persistence { .. } | Self::Timeout { .. } | Self::RecordLoad { .. }
        )
    }
}
