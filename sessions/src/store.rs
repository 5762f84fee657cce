//! Session store engine.
//!
//! Ties the cookie codec, the document store and the HTTP collaborator
//! together:
//!
//! ```text
//! Cookie ─decode→ SessionId ─find_one→ PersistedDocument ─decode→ values
//! values ─encode→ PersistedDocument ─upsert→ store, then SessionId ─encode→ Set-Cookie
//! ```
//!
//! There is no in-memory cache and no lock. Each load and save is its own
//! round trip, and concurrent saves of one id resolve as last write wins.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;

use crate::codec::CodecChain;
use crate::config::{KeyPair, SessionOptions, StoreConfig};
use crate::cookies::{RequestCookies, ResponseCookies, removal_cookie, session_cookie};
use crate::error::{Result, SessionError, StoreError, StoreOperation};
use crate::providers::DocumentStore;
use crate::registry::SessionRegistry;
use crate::state::{PersistedDocument, Session, SessionId, SessionValues};
use crate::ttl::{TtlIndexManager, TtlIndexStatus};

/// A session created from a request.
///
/// The session is always usable. `error` is set when the request carried a
/// cookie that could not be decoded, or when the referenced record could not
/// be loaded; the caller decides whether that fails the request or starts
/// over with the fresh session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionLoad {
    /// The session, new or loaded.
    pub session: Session,

    /// Decode or load failure, if any.
    pub error: Option<SessionError>,
}

impl SessionLoad {
    /// Session with no error.
    #[must_use]
    pub const fn ok(session: Session) -> Self {
        Self {
            session,
            error: None,
        }
    }

    /// Discard the session if an error occurred.
    ///
    /// # Errors
    ///
    /// Returns the decode or load error, if any.
    pub fn into_result(self) -> Result<Session> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.session),
        }
    }

    /// Keep the session and ignore any error.
    #[must_use]
    pub fn into_session(self) -> Session {
        self.session
    }
}

/// A store returned together with the outcome of TTL index setup.
///
/// Index setup failing does not prevent using the store; sessions are then
/// only removed by explicit deletion.
#[derive(Debug)]
pub struct StoreInit<D> {
    /// The constructed store.
    pub store: SessionStore<D>,

    /// Result of ensuring the TTL index.
    pub index: Result<TtlIndexStatus>,
}

impl<D> StoreInit<D> {
    /// Treat an index failure as fatal.
    ///
    /// # Errors
    ///
    /// Returns the index setup error, if any.
    pub fn into_result(self) -> Result<SessionStore<D>> {
        self.index.map(|_| self.store)
    }

    /// Keep the store regardless of the index outcome.
    #[must_use]
    pub fn into_store(self) -> SessionStore<D> {
        self.store
    }
}

/// Sessions persisted in a [`DocumentStore`] and bound to signed cookies.
///
/// Cheap to share behind an `Arc`; holds only immutable configuration and
/// the store handle.
///
/// # Example
///
/// ```rust,ignore
/// use docstore_sessions::{KeyPair, SessionStore, StoreConfig};
///
/// let store = SessionStore::open(documents, StoreConfig::default(), &[KeyPair::new(hash_key)])
///     .await?
///     .into_result()?;
///
/// let mut session = store.new_session(request.headers(), "app").await.into_session();
/// session.insert("user", "alice");
/// store.save(&mut session, response.headers_mut()).await?;
/// ```
pub struct SessionStore<D> {
    documents: D,
    /// Codecs for cookie values, length-limited.
    cookie_codecs: CodecChain,
    /// Codecs for stored session data, unbounded.
    data_codecs: CodecChain,
    config: StoreConfig,
}

impl<D: DocumentStore> SessionStore<D> {
    /// Create a store without touching the TTL index.
    ///
    /// `key_pairs` are in priority order: the first encodes, all decode.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Config`] if the configuration is inconsistent
    /// or a key pair is invalid.
    pub fn new(documents: D, config: StoreConfig, key_pairs: &[KeyPair]) -> Result<Self> {
        config.validate()?;

        let cookie_codecs =
            CodecChain::from_key_pairs(key_pairs, config.session_options.max_age)
                .map_err(|e| SessionError::Config(e.to_string()))?;
        let data_codecs = cookie_codecs.with_max_length(None);

        Ok(Self {
            documents,
            cookie_codecs,
            data_codecs,
            config,
        })
    }

    /// Create a store and ensure its TTL index.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Config`] for invalid configuration. TTL index
    /// failures are reported in [`StoreInit::index`] instead.
    pub async fn open(documents: D, config: StoreConfig, key_pairs: &[KeyPair]) -> Result<StoreInit<D>> {
        let store = Self::new(documents, config, key_pairs)?;
        let index = store.ensure_ttl_index().await;
        if let Err(e) = &index {
            tracing::warn!(error = %e, "TTL index setup failed, sessions will not auto-expire");
        }
        Ok(StoreInit { store, index })
    }

    /// [`SessionStore::open`] with [`StoreConfig::default`]: TTL index on,
    /// path `/`, 30-day max age, HTTP-only cookies.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Config`] if a key pair is invalid.
    pub async fn open_default(documents: D, key_pairs: &[KeyPair]) -> Result<StoreInit<D>> {
        Self::open(documents, StoreConfig::default(), key_pairs).await
    }

    /// Ensure the TTL index matches the configured max age.
    ///
    /// # Errors
    ///
    /// Returns the failing index operation wrapped in
    /// [`SessionError::Persistence`] or [`SessionError::Timeout`].
    pub async fn ensure_ttl_index(&self) -> Result<TtlIndexStatus> {
        if !self.config.index_ttl {
            return Ok(TtlIndexStatus::Disabled);
        }
        TtlIndexManager::new(
            self.config.session_options.max_age,
            self.config.ttl_index_mode,
            self.config.index_timeout,
        )?
        .ensure(&self.documents)
        .await
    }

    /// Store configuration.
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Default options copied into new sessions.
    #[must_use]
    pub const fn options(&self) -> &SessionOptions {
        &self.config.session_options
    }

    /// The underlying document store.
    #[must_use]
    pub const fn documents(&self) -> &D {
        &self.documents
    }

    /// Create the session named `name` for this request, decoding and loading
    /// it every time.
    ///
    /// - No cookie: a new session, no error, no store lookup.
    /// - Undecodable cookie: a new session and [`SessionError::CookieDecode`].
    /// - Decodable cookie: the stored record, or a new session carrying the
    ///   decoded id when the record has expired or vanished.
    pub async fn new_session<R>(&self, request: &R, name: &str) -> SessionLoad
    where
        R: RequestCookies + ?Sized,
    {
        let mut session = Session::new(name, self.config.session_options.clone());

        let Some(cookie) = request.cookie(name) else {
            return SessionLoad::ok(session);
        };

        let id: String = match self.cookie_codecs.decode(name, &cookie) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(cookie = name, error = %e, "Session cookie rejected");
                return SessionLoad {
                    session,
                    error: Some(SessionError::CookieDecode(e)),
                };
            }
        };
        session.id = Some(id);

        match self.load(&mut session).await {
            Ok(_) => SessionLoad::ok(session),
            Err(e) => SessionLoad {
                session,
                error: Some(e),
            },
        }
    }

    /// Return the session named `name` from `registry`, creating it with
    /// [`SessionStore::new_session`] on first use in this request.
    pub async fn get<'r, R>(
        &self,
        registry: &'r mut SessionRegistry,
        request: &R,
        name: &str,
    ) -> (&'r mut Session, Option<SessionError>)
    where
        R: RequestCookies + ?Sized,
    {
        registry.get(self, request, name).await
    }

    /// Load the stored values for `session.id`.
    ///
    /// # Returns
    ///
    /// `true` if a record was found. A missing record is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidIdentifier`] for a malformed id,
    /// [`SessionError::RecordLoad`] if the store fails or the stored data
    /// cannot be decoded, and [`SessionError::Timeout`] past the deadline.
    pub async fn load(&self, session: &mut Session) -> Result<bool> {
        let Some(raw) = session.id.as_deref() else {
            session.is_new = true;
            return Ok(false);
        };
        let id = SessionId::parse(raw)?;

        let document = self
            .bounded(StoreOperation::Load, self.documents.find_one(&id))
            .await
            .map_err(|e| match e {
                SessionError::Persistence { source, .. } => SessionError::RecordLoad {
                    reason: source.to_string(),
                },
                other => other,
            })?;

        let Some(document) = document else {
            tracing::debug!(session_id = %id, "Session record not found");
            session.is_new = true;
            return Ok(false);
        };

        let values: SessionValues = self
            .data_codecs
            .decode(session.name(), &document.data)
            .map_err(|e| SessionError::RecordLoad {
                reason: format!("stored data rejected: {e}"),
            })?;

        session.values = values;
        session.is_new = false;
        tracing::debug!(session_id = %id, "Loaded session");
        Ok(true)
    }

    /// Persist `session` and write its cookie to `response`.
    ///
    /// With `max_age <= 0` the record is deleted and an expired cookie is
    /// written instead; this is the only way to delete a session. Otherwise
    /// the values are upserted and the cookie is written only once the
    /// upsert succeeded.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidIdentifier`] if `session.id` is malformed
    /// - [`SessionError::InvalidModifiedValue`] if `values["modified"]` is not
    ///   a timestamp (nothing is written)
    /// - [`SessionError::Encode`] if values or id cannot be encoded
    /// - [`SessionError::Persistence`] / [`SessionError::Timeout`] if the
    ///   store fails
    /// - [`SessionError::CookieWrite`] if the response rejects the cookie
    pub async fn save<W>(&self, session: &mut Session, response: &mut W) -> Result<()>
    where
        W: ResponseCookies + ?Sized,
    {
        let id = match session.id.as_deref() {
            Some(raw) => SessionId::parse(raw)?,
            None => {
                let id = SessionId::new();
                session.id = Some(id.to_hex());
                id
            }
        };

        if session.options.is_expired() {
            let removed = self
                .bounded(StoreOperation::Delete, self.documents.delete_one(&id))
                .await?;
            response.set_cookie(&removal_cookie(session.name(), &session.options))?;
            tracing::debug!(session_id = %id, removed, "Deleted session");
            return Ok(());
        }

        let modified = session.modified_or(Utc::now())?;
        session.check_values()?;
        let data = self
            .data_codecs
            .encode(session.name(), &session.values)
            .map_err(SessionError::Encode)?;
        let cookie_value = self
            .cookie_codecs
            .encode(session.name(), &id.to_hex())
            .map_err(SessionError::Encode)?;

        let document = PersistedDocument { id, data, modified };
        self.bounded(StoreOperation::Save, self.documents.upsert(&document))
            .await?;

        response.set_cookie(&session_cookie(session.name(), cookie_value, &session.options))?;
        tracing::debug!(session_id = %id, modified = %modified, "Saved session");
        Ok(())
    }

    async fn bounded<T>(
        &self,
        operation: StoreOperation,
        future: impl Future<Output = std::result::Result<T, StoreError>>,
    ) -> Result<T> {
        with_deadline(operation, self.config.operation_timeout, future).await
    }
}

impl<D> std::fmt::Debug for SessionStore<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("codecs", &self.cookie_codecs)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Run a store operation under an optional deadline, tagging failures with
/// the operation.
pub(crate) async fn with_deadline<T>(
    operation: StoreOperation,
    timeout: Option<Duration>,
    future: impl Future<Output = std::result::Result<T, StoreError>>,
) -> Result<T> {
    let outcome = match timeout {
        Some(after) => tokio::time::timeout(after, future).await.map_err(|_| {
            tracing::warn!(%operation, timeout = ?after, "Session store operation timed out");
            SessionError::Timeout { operation, after }
        })?,
        None => future.await,
    };
    outcome.map_err(|source| SessionError::persistence(operation, source))
}
