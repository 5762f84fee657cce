//! # Document Store Sessions
//!
//! Server-side HTTP sessions persisted in a document database and bound to
//! the browser through a signed, optionally encrypted cookie.
//!
//! ## Features
//!
//! - **Id-only cookies**: the cookie carries just the session id; values
//!   live in the store
//! - **Key rotation**: any number of key pairs, newest first
//! - **Automatic expiry**: a TTL index on `modified` removes stale records
//! - **Bounded I/O**: every store call runs under a deadline
//! - **Testable**: the store is a trait with an in-memory mock
//!
//! ## Architecture
//!
//! ```text
//! request ─→ SessionStore::new_session ─→ Session ─→ handler
//!                     │                                 │
//!                     ▼                                 ▼
//!               DocumentStore  ←──────────── SessionStore::save ─→ Set-Cookie
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use docstore_sessions::*;
//!
//! let store = SessionStore::open_default(documents, &[KeyPair::new(hash_key)])
//!     .await?
//!     .into_result()?;
//!
//! let mut registry = SessionRegistry::new();
//! let (session, _) = registry.get(&store, request.headers(), "app").await;
//! session.insert("user", "alice");
//!
//! registry.save_all(&store, response.headers_mut()).await?;
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

// Public modules
pub mod codec;
pub mod config;
pub mod constants;
pub mod cookies;
pub mod error;
pub mod providers;
pub mod registry;
pub mod state;
pub mod store;
pub mod ttl;

// Document store backends
#[cfg(feature = "mongodb")]
pub mod stores;

// Mock implementations for testing
#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

// Re-export main types for convenience
pub use codec::{Codec, CodecChain, CodecError, SecureCookie};
pub use config::{KeyPair, SessionOptions, StoreConfig, TtlIndexMode};
pub use cookie::{Cookie, SameSite};
pub use cookies::{RequestCookies, ResponseCookies, removal_cookie, session_cookie};
pub use error::{Result, SessionError, StoreError, StoreOperation};
pub use providers::DocumentStore;
pub use registry::SessionRegistry;
pub use state::{IndexSpec, PersistedDocument, Session, SessionId, SessionValue, SessionValues};
pub use store::{SessionLoad, SessionStore, StoreInit};
pub use ttl::{TtlIndexManager, TtlIndexStatus};
