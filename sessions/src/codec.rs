//! Authenticated, optionally encrypted value codec.
//!
//! Wire format (before the outer URL-safe base64):
//!
//! ```text
//! {unix_seconds}|{base64(payload or nonce‖ciphertext)}|{base64(hmac)}
//! ```
//!
//! The HMAC-SHA256 tag covers `{name}|{unix_seconds}|{base64 payload}`, so a
//! value encoded for one cookie name never decodes under another. When a
//! block key is configured the payload is sealed with AES-256-GCM first.
//!
//! [`CodecChain`] holds codecs in priority order: the first encodes, each is
//! tried in turn to decode. Rotating keys means prepending a new pair and
//! keeping the old one until every outstanding cookie has expired.

use std::sync::Arc;

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use thiserror::Error;

use crate::config::KeyPair;
use crate::constants::DEFAULT_MAX_COOKIE_LENGTH;

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 12;
const BLOCK_KEY_LEN: usize = 32;

/// Codec failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Key material is unusable.
    #[error("invalid codec key: {0}")]
    InvalidKey(String),

    /// The encoded value does not have the expected structure.
    #[error("malformed value: {0}")]
    Malformed(&'static str),

    /// The authentication tag does not match (tampered, wrong key or name).
    #[error("the value is not valid")]
    MacMismatch,

    /// The embedded timestamp could not be parsed.
    #[error("invalid timestamp")]
    InvalidTimestamp,

    /// The embedded timestamp is older than the codec max age.
    #[error("expired timestamp")]
    Expired,

    /// Sealing the payload failed.
    #[error("encryption failed")]
    Encrypt,

    /// Opening the payload failed.
    #[error("decryption failed")]
    Decrypt,

    /// The value could not be serialized.
    #[error("serialization failed: {0}")]
    Serialize(String),

    /// The authenticated payload could not be deserialized.
    #[error("deserialization failed: {0}")]
    Deserialize(String),

    /// The encoded value exceeds the configured maximum length.
    #[error("value too long: {length} bytes exceeds {max}")]
    ValueTooLong {
        /// Actual length
        length: usize,
        /// Configured limit
        max: usize,
    },

    /// The chain has no codecs.
    #[error("no codecs configured")]
    NoCodecs,
}

/// Byte-level authenticate/encrypt capability.
pub trait Codec: Send + Sync {
    /// Protect `payload` for the cookie called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if encryption fails or the result is too long.
    fn encode(&self, name: &str, payload: &[u8]) -> Result<String, CodecError>;

    /// Verify and open a value produced by [`Codec::encode`] under the same
    /// `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the value is malformed, tampered, expired,
    /// or cannot be decrypted.
    fn try_decode(&self, name: &str, encoded: &str) -> Result<Vec<u8>, CodecError>;
}

/// HMAC-SHA256 signing codec with optional AES-256-GCM encryption and a
/// signed timestamp.
#[derive(Clone)]
pub struct SecureCookie {
    hash_key: Arc<[u8]>,
    /// Each encode draws a fresh nonce.
    cipher: Option<Arc<Aes256Gcm>>,
    max_age: i64,
    max_length: Option<usize>,
}

impl SecureCookie {
    /// Build a codec from one key pair.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidKey`] if the hash key is empty or the
    /// block key is not 32 bytes.
    pub fn new(pair: &KeyPair) -> Result<Self, CodecError> {
        if pair.hash_key.is_empty() {
            return Err(CodecError::InvalidKey("hash key must not be empty".to_string()));
        }

        let cipher = match &pair.block_key {
            None => None,
            Some(key) if key.len() == BLOCK_KEY_LEN => {
                let cipher = Aes256Gcm::new_from_slice(key)
                    .map_err(|e| CodecError::InvalidKey(format!("block key rejected: {e}")))?;
                Some(Arc::new(cipher))
            }
            Some(key) => {
                return Err(CodecError::InvalidKey(format!(
                    "block key must be {BLOCK_KEY_LEN} bytes, got {}",
                    key.len()
                )));
            }
        };

        Ok(Self {
            hash_key: Arc::from(pair.hash_key.as_slice()),
            cipher,
            max_age: 0,
            max_length: Some(DEFAULT_MAX_COOKIE_LENGTH),
        })
    }

    /// Reject values whose timestamp is older than `seconds`. `<= 0` disables
    /// the check.
    #[must_use]
    pub const fn with_max_age(mut self, seconds: i64) -> Self {
        self.max_age = seconds;
        self
    }

    /// Limit the encoded length. `None` removes the limit.
    #[must_use]
    pub const fn with_max_length(mut self, max_length: Option<usize>) -> Self {
        self.max_length = max_length;
        self
    }

    /// Returns `true` if payloads are encrypted as well as signed.
    #[must_use]
    pub const fn encrypts(&self) -> bool {
        self.cipher.is_some()
    }

    fn mac(&self, name: &str, timestamp: &str, value: &str) -> Result<Vec<u8>, CodecError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.hash_key)
            .map_err(|e| CodecError::InvalidKey(e.to_string()))?;
        mac.update(name.as_bytes());
        mac.update(b"|");
        mac.update(timestamp.as_bytes());
        mac.update(b"|");
        mac.update(value.as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn check_length(&self, length: usize) -> Result<(), CodecError> {
        match self.max_length {
            Some(max) if length > max => Err(CodecError::ValueTooLong { length, max }),
            _ => Ok(()),
        }
    }

    fn seal(&self, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
        let Some(cipher) = &self.cipher else {
            return Ok(payload.to_vec());
        };
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, payload)
            .map_err(|_| CodecError::Encrypt)?;

        // Format: [nonce (12 bytes)][ciphertext (variable)]
        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn open(&self, sealed: Vec<u8>) -> Result<Vec<u8>, CodecError> {
        let Some(cipher) = &self.cipher else {
            return Ok(sealed);
        };
        if sealed.len() < NONCE_LEN {
            return Err(CodecError::Decrypt);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CodecError::Decrypt)
    }
}

impl Codec for SecureCookie {
    fn encode(&self, name: &str, payload: &[u8]) -> Result<String, CodecError> {
        let value = URL_SAFE_NO_PAD.encode(self.seal(payload)?);
        let timestamp = Utc::now().timestamp().to_string();
        let mac = URL_SAFE_NO_PAD.encode(self.mac(name, &timestamp, &value)?);

        let encoded = URL_SAFE_NO_PAD.encode(format!("{timestamp}|{value}|{mac}"));
        self.check_length(encoded.len())?;
        Ok(encoded)
    }

    fn try_decode(&self, name: &str, encoded: &str) -> Result<Vec<u8>, CodecError> {
        self.check_length(encoded.len())?;

        let raw = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| CodecError::Malformed("outer base64"))?;
        let body = String::from_utf8(raw).map_err(|_| CodecError::Malformed("utf-8"))?;

        let mut parts = body.splitn(3, '|');
        let (Some(timestamp), Some(value), Some(mac)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(CodecError::Malformed("missing fields"));
        };

        let given = URL_SAFE_NO_PAD
            .decode(mac)
            .map_err(|_| CodecError::MacMismatch)?;
        let expected = self.mac(name, timestamp, value)?;
        if !constant_time_eq::constant_time_eq(&given, &expected) {
            return Err(CodecError::MacMismatch);
        }

        let issued: i64 = timestamp
            .parse()
            .map_err(|_| CodecError::InvalidTimestamp)?;
        if self.max_age > 0 && issued < Utc::now().timestamp() - self.max_age {
            return Err(CodecError::Expired);
        }

        let sealed = URL_SAFE_NO_PAD
            .decode(value)
            .map_err(|_| CodecError::Malformed("payload base64"))?;
        self.open(sealed)
    }
}

/// Ordered codecs: the first encodes, all are tried to decode.
///
/// Values are serialized as JSON before protection.
#[derive(Clone)]
pub struct CodecChain<C = SecureCookie> {
    codecs: Arc<[C]>,
}

impl<C: Codec> CodecChain<C> {
    /// Wrap codecs in priority order.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::NoCodecs`] if `codecs` is empty.
    pub fn new(codecs: Vec<C>) -> Result<Self, CodecError> {
        if codecs.is_empty() {
            return Err(CodecError::NoCodecs);
        }
        Ok(Self {
            codecs: Arc::from(codecs),
        })
    }

    /// Number of codecs in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    /// Always `false` for a constructed chain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    /// Serialize `value` and protect it with the primary codec.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if serialization or the primary codec fails.
    pub fn encode<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<String, CodecError> {
        let payload = serde_json::to_vec(value).map_err(|e| CodecError::Serialize(e.to_string()))?;
        let primary = self.codecs.first().ok_or(CodecError::NoCodecs)?;
        primary.encode(name, &payload)
    }

    /// Try each codec in order and deserialize the first payload that
    /// authenticates.
    ///
    /// # Errors
    ///
    /// Returns the primary codec's error when no codec accepts the value, or
    /// [`CodecError::Deserialize`] when an authenticated payload has the
    /// wrong shape.
    pub fn decode<T: DeserializeOwned>(&self, name: &str, encoded: &str) -> Result<T, CodecError> {
        let mut first_error = None;
        for codec in self.codecs.iter() {
            match codec.try_decode(name, encoded) {
                Ok(payload) => {
                    return serde_json::from_slice(&payload)
                        .map_err(|e| CodecError::Deserialize(e.to_string()));
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        Err(first_error.unwrap_or(CodecError::NoCodecs))
    }
}

impl CodecChain<SecureCookie> {
    /// Build a chain from key pairs, enforcing `max_age` on every codec.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if any key pair is invalid or none is given.
    pub fn from_key_pairs(pairs: &[KeyPair], max_age: i64) -> Result<Self, CodecError> {
        let codecs = pairs
            .iter()
            .map(|pair| SecureCookie::new(pair).map(|codec| codec.with_max_age(max_age)))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(codecs)
    }

    /// Copy of this chain with a different encoded-length limit.
    #[must_use]
    pub fn with_max_length(&self, max_length: Option<usize>) -> Self {
        let codecs: Vec<SecureCookie> = self
            .codecs
            .iter()
            .cloned()
            .map(|codec| codec.with_max_length(max_length))
            .collect();
        Self {
            codecs: Arc::from(codecs),
        }
    }
}

impl<C> std::fmt::Debug for CodecChain<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecChain")
            .field("codecs", &self.codecs.len())
            .finish()
    }
}
