//! Session store configuration.
//!
//! Configuration values are provided by the application. Every new session
//! receives its own copy of [`SessionOptions`], so changing the store defaults
//! never alters a session that is already in flight.

use std::time::Duration;

use cookie::SameSite;

use crate::constants::DEFAULT_MAX_AGE_SECS;
use crate::error::{Result, SessionError};

/// Cookie and lifetime options applied to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Cookie path.
    ///
    /// Default: `/`
    pub path: String,

    /// Cookie domain. `None` leaves the attribute out.
    pub domain: Option<String>,

    /// Session lifetime in seconds.
    ///
    /// A value `<= 0` deletes the session on the next save.
    ///
    /// Default: 30 days
    pub max_age: i64,

    /// HTTP-only flag.
    ///
    /// Default: `true`
    pub http_only: bool,

    /// Secure flag.
    ///
    /// Default: `false`
    pub secure: bool,

    /// `SameSite` policy. `None` leaves the attribute out.
    pub same_site: Option<SameSite>,
}

impl SessionOptions {
    /// Set cookie path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set cookie domain.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Set session lifetime in seconds.
    #[must_use]
    pub const fn with_max_age(mut self, seconds: i64) -> Self {
        self.max_age = seconds;
        self
    }

    /// Set HTTP-only flag.
    #[must_use]
    pub const fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// Set secure flag.
    #[must_use]
    pub const fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Set `SameSite` policy.
    #[must_use]
    pub const fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    /// Returns `true` if saving a session with these options deletes it.
    #[must_use]
    pub const fn is_expired(&self) -> bool {
        self.max_age <= 0
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            domain: None,
            max_age: DEFAULT_MAX_AGE_SECS,
            http_only: true,
            secure: false,
            same_site: None,
        }
    }
}

/// What to do when the TTL index exists but its expiry differs from the
/// configured max age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtlIndexMode {
    /// Drop and recreate the index with the configured expiry.
    #[default]
    Reconcile,

    /// Leave any index with the reserved name untouched.
    KeepExisting,
}

/// Session store configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Create a TTL index on the `modified` field at startup.
    ///
    /// Default: `true`
    pub index_ttl: bool,

    /// How an existing TTL index with a stale expiry is handled.
    ///
    /// Default: [`TtlIndexMode::Reconcile`]
    pub ttl_index_mode: TtlIndexMode,

    /// Defaults copied into every new session and its cookie.
    pub session_options: SessionOptions,

    /// Deadline for each load/save/delete round trip. `None` waits forever.
    ///
    /// Default: 10 seconds
    pub operation_timeout: Option<Duration>,

    /// Deadline for each index operation at startup. `None` waits forever.
    ///
    /// Default: 30 seconds
    pub index_timeout: Option<Duration>,
}

impl StoreConfig {
    /// Create configuration with the given session options.
    #[must_use]
    pub fn new(session_options: SessionOptions) -> Self {
        Self {
            session_options,
            ..Self::default()
        }
    }

    /// Enable or disable TTL index management.
    #[must_use]
    pub const fn with_index_ttl(mut self, enabled: bool) -> Self {
        self.index_ttl = enabled;
        self
    }

    /// Set TTL index reconciliation mode.
    #[must_use]
    pub const fn with_ttl_index_mode(mut self, mode: TtlIndexMode) -> Self {
        self.ttl_index_mode = mode;
        self
    }

    /// Set per-operation deadline.
    #[must_use]
    pub const fn with_operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set index-setup deadline.
    #[must_use]
    pub const fn with_index_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.index_timeout = timeout;
        self
    }

    /// Check the configuration for contradictions.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Config`] if TTL indexing is enabled with a
    /// non-positive max age (the index would expire every document at once).
    pub fn validate(&self) -> Result<()> {
        if self.index_ttl && self.session_options.max_age <= 0 {
            return Err(SessionError::Config(
                "index_ttl requires a positive session max_age".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            index_ttl: true,
            ttl_index_mode: TtlIndexMode::Reconcile,
            session_options: SessionOptions::default(),
            operation_timeout: Some(Duration::from_secs(10)),
            index_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// One codec key pair: an authentication key and an optional encryption key.
///
/// The block key, when set, must be exactly 32 bytes (AES-256-GCM).
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    /// HMAC-SHA256 key. Any non-empty length; 32 or 64 bytes recommended.
    pub hash_key: Vec<u8>,

    /// AES-256-GCM key. `None` signs without encrypting.
    pub block_key: Option<Vec<u8>>,
}

impl KeyPair {
    /// Create a signing-only key pair.
    #[must_use]
    pub fn new(hash_key: impl Into<Vec<u8>>) -> Self {
        Self {
            hash_key: hash_key.into(),
            block_key: None,
        }
    }

    /// Add an encryption key.
    #[must_use]
    pub fn with_block_key(mut self, block_key: impl Into<Vec<u8>>) -> Self {
        self.block_key = Some(block_key.into());
        self
    }

    /// Build key pairs from a flat `hash, block, hash, block, …` sequence.
    ///
    /// An empty block key means "sign only". A trailing hash key without a
    /// block key is accepted.
    ///
    /// # Examples
    ///
    /// ```
    /// # use docstore_sessions::KeyPair;
    /// let pairs = KeyPair::from_pairs([b"new-hash".to_vec(), vec![], b"old-hash".to_vec()]);
    /// assert_eq!(pairs.len(), 2);
    /// assert!(pairs[0].block_key.is_none());
    /// ```
    #[must_use]
    pub fn from_pairs<I>(keys: I) -> Vec<Self>
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        let mut keys = keys.into_iter();
        let mut pairs = Vec::new();
        while let Some(hash_key) = keys.next() {
            let block_key = keys.next().filter(|key| !key.is_empty());
            pairs.push(Self {
                hash_key,
                block_key,
            });
        }
        pairs
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("hash_key", &"[REDACTED]")
            .field("block_key", &self.block_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
