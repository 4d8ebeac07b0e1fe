//! Symmetric authenticated encryption for stored face templates.
//!
//! Tokens are URL-safe base64 of:
//!
//! ```text
//! | version (1) | issued_at, unix seconds BE (8) | nonce (12) | AES-256-GCM ciphertext + tag |
//! ```
//!
//! The version and timestamp header is bound as associated data, so any
//! change to it fails authentication just like a change to the ciphertext.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

const TOKEN_VERSION: u8 = 0x01;
const KEY_LEN: usize = 32;
const ENCODED_KEY_LEN: usize = 44;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + 8;
const KEY_PAD_BYTE: u8 = b'0';

#[derive(Error, Debug)]
pub enum CipherError {
    #[error("encryption key is empty")]
    EmptyKey,
    #[error("encryption failed: {0}")]
    Encrypt(String),
    #[error("decryption failed: {0}")]
    Decrypt(String),
}

/// How the configured key string became key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// The configured string was already a 32-byte URL-safe base64 key.
    Provided,
    /// The configured string was padded/truncated to 32 bytes. Kept for
    /// compatibility with existing deployments; not a real key derivation.
    Derived,
}

/// Process-wide template cipher. Built once at startup and injected.
#[derive(Clone)]
pub struct TemplateCipher {
    aead: Aes256Gcm,
    source: KeySource,
    fingerprint: String,
}

impl TemplateCipher {
    /// Build a cipher from the configured key string.
    ///
    /// A 44-character URL-safe base64 string decoding to 32 bytes is used as
    /// is. Any other non-empty string is truncated to 32 bytes and
    /// right-padded with ASCII `'0'`, which means every non-empty string
    /// yields a usable key. That fallback is logged as insecure.
    pub fn from_config_key(configured: &str) -> Result<Self, CipherError> {
        if configured.is_empty() {
            return Err(CipherError::EmptyKey);
        }

        let (key, source) = match decode_key(configured) {
            Some(key) => (key, KeySource::Provided),
            None => (pad_key(configured.as_bytes()), KeySource::Derived),
        };

        let cipher = Self::from_key_bytes(&key, source);
        match source {
            KeySource::Provided => tracing::info!(
                fingerprint = %cipher.fingerprint,
                "template cipher initialised"
            ),
            KeySource::Derived => tracing::warn!(
                fingerprint = %cipher.fingerprint,
                configured_len = configured.len(),
                "encryption key is not a 32-byte URL-safe base64 key; padding/truncating it \
                 instead (insecure, generate one with `clens-face gen-key`)"
            ),
        }
        Ok(cipher)
    }

    fn from_key_bytes(key: &[u8; KEY_LEN], source: KeySource) -> Self {
        let digest = Sha256::digest(key);
        let fingerprint = digest[..4]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<String>();
        Self {
            aead: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
            source,
            fingerprint,
        }
    }

    pub fn key_source(&self) -> KeySource {
        self.source
    }

    /// Short SHA-256 prefix of the key material, safe to log.
    pub fn key_fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Encrypt `plaintext` under a fresh random nonce, stamped with the current time.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        self.encrypt_at(plaintext, Utc::now().timestamp())
    }

    fn encrypt_at(&self, plaintext: &str, issued_at: i64) -> Result<String, CipherError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let header = header(issued_at);
        let ciphertext = self
            .aead
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: &header,
                },
            )
            .map_err(|err| CipherError::Encrypt(err.to_string()))?;

        let mut token = Vec::with_capacity(HEADER_LEN + NONCE_LEN + ciphertext.len());
        token.extend_from_slice(&header);
        token.extend_from_slice(&nonce);
        token.extend_from_slice(&ciphertext);
        Ok(URL_SAFE.encode(token))
    }

    /// Decrypt a token produced by [`encrypt`](Self::encrypt).
    ///
    /// Malformed, tampered, or foreign-key tokens all fail with
    /// [`CipherError::Decrypt`].
    pub fn decrypt(&self, token: &str) -> Result<String, CipherError> {
        self.open(token).map(|(plaintext, _)| plaintext)
    }

    /// Authenticated issue time of a token.
    pub fn issued_at(&self, token: &str) -> Result<DateTime<Utc>, CipherError> {
        let (_, issued_at) = self.open(token)?;
        DateTime::from_timestamp(issued_at, 0)
            .ok_or_else(|| CipherError::Decrypt(format!("timestamp {issued_at} out of range")))
    }

    fn open(&self, token: &str) -> Result<(String, i64), CipherError> {
        let raw = URL_SAFE
            .decode(token)
            .map_err(|err| CipherError::Decrypt(format!("invalid token encoding: {err}")))?;

        if raw.len() < HEADER_LEN + NONCE_LEN + TAG_LEN {
            return Err(CipherError::Decrypt(format!(
                "token too short ({} bytes)",
                raw.len()
            )));
        }
        if raw[0] != TOKEN_VERSION {
            return Err(CipherError::Decrypt(format!(
                "unsupported token version {:#04x}",
                raw[0]
            )));
        }

        let (header, rest) = raw.split_at(HEADER_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        let plaintext = self
            .aead
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: header,
                },
            )
            .map_err(|_| CipherError::Decrypt("authentication failed".into()))?;

        let mut ts = [0u8; 8];
        ts.copy_from_slice(&header[1..]);
        let plaintext = String::from_utf8(plaintext)
            .map_err(|_| CipherError::Decrypt("plaintext is not UTF-8".into()))?;
        Ok((plaintext, i64::from_be_bytes(ts)))
    }
}

impl fmt::Debug for TemplateCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateCipher")
            .field("source", &self.source)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

/// Generate a fresh random key in the accepted 44-character form.
pub fn generate_key() -> String {
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    URL_SAFE.encode(key)
}

fn decode_key(configured: &str) -> Option<[u8; KEY_LEN]> {
    if configured.len() != ENCODED_KEY_LEN {
        return None;
    }
    let bytes = URL_SAFE.decode(configured).ok()?;
    bytes.try_into().ok()
}

fn pad_key(raw: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [KEY_PAD_BYTE; KEY_LEN];
    let n = raw.len().min(KEY_LEN);
    key[..n].copy_from_slice(&raw[..n]);
    key
}

fn header(issued_at: i64) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0] = TOKEN_VERSION;
    header[1..].copy_from_slice(&issued_at.to_be_bytes());
    header
}
