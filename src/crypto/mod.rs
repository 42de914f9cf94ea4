//! Encrypted datasource connection parameters.
//!
//! Connection params are stored as base64 text holding a 12-byte nonce
//! followed by the AES-256-GCM sealed JSON document. [`decrypt_params`]
//! reverses [`encrypt_params`].
//!
//! ```rust
//! use expql::crypto::{decrypt_params, encrypt_params, generate_master_key, ConnectionParams};
//!
//! let key = generate_master_key().unwrap();
//! let params = ConnectionParams::new("12345", "s3cret", "svc-account");
//!
//! let sealed = encrypt_params(&key, &params).unwrap();
//! assert_eq!(decrypt_params(&key, &sealed).unwrap(), params);
//! ```

pub mod master_key;

pub use master_key::{get as get_master_key, init as init_master_key, MasterKeyState};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// AES-256 key length in bytes.
pub const KEY_LENGTH: usize = 32;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("invalid key length: expected {KEY_LENGTH} bytes")]
    InvalidKeyLength,

    #[error("invalid ciphertext")]
    InvalidCiphertext,

    #[error("connection params are not valid JSON: {0}")]
    InvalidParams(#[from] serde_json::Error),
}

/// Credentials for an analytics project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionParams {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub username: String,
}

impl ConnectionParams {
    pub fn new(
        project_id: impl Into<String>,
        secret: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            secret: secret.into(),
            username: username.into(),
        }
    }
}

/// Generate a random master key.
pub fn generate_master_key() -> CryptoResult<[u8; KEY_LENGTH]> {
    let mut key = [0u8; KEY_LENGTH];
    SystemRandom::new()
        .fill(&mut key)
        .map_err(|_| CryptoError::EncryptionFailed)?;
    Ok(key)
}

pub fn encode_key(key: &[u8; KEY_LENGTH]) -> String {
    BASE64.encode(key)
}

/// Decode a base64 master key, rejecting anything that is not 32 bytes.
pub fn decode_key(encoded: &str) -> CryptoResult<[u8; KEY_LENGTH]> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|_| CryptoError::InvalidKeyLength)?;
    bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength)
}

fn aead_key(key: &[u8; KEY_LENGTH], on_error: CryptoError) -> CryptoResult<LessSafeKey> {
    UnboundKey::new(&AES_256_GCM, key)
        .map(LessSafeKey::new)
        .map_err(|_| on_error)
}

/// Seal `plaintext` under `key` and return `base64(nonce || ciphertext || tag)`.
pub fn encrypt(key: &[u8; KEY_LENGTH], plaintext: &[u8]) -> CryptoResult<String> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let sealing_key = aead_key(key, CryptoError::EncryptionFailed)?;
    let mut sealed = plaintext.to_vec();
    sealing_key
        .seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce_bytes), Aad::empty(), &mut sealed)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&sealed);
    Ok(BASE64.encode(out))
}

/// Open a value produced by [`encrypt`].
pub fn decrypt(key: &[u8; KEY_LENGTH], ciphertext: &str) -> CryptoResult<Vec<u8>> {
    let data = BASE64
        .decode(ciphertext.trim())
        .map_err(|_| CryptoError::InvalidCiphertext)?;
    if data.len() <= NONCE_LEN {
        return Err(CryptoError::InvalidCiphertext);
    }

    let (nonce_bytes, sealed) = data.split_at(NONCE_LEN);
    let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
        .map_err(|_| CryptoError::InvalidCiphertext)?;

    let opening_key = aead_key(key, CryptoError::DecryptionFailed)?;
    let mut in_out = sealed.to_vec();
    let plaintext = opening_key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| CryptoError::DecryptionFailed)?;
    Ok(plaintext.to_vec())
}

pub fn encrypt_params(key: &[u8; KEY_LENGTH], params: &ConnectionParams) -> CryptoResult<String> {
    let json = serde_json::to_vec(params)?;
    encrypt(key, &json)
}

pub fn decrypt_params(key: &[u8; KEY_LENGTH], sealed: &str) -> CryptoResult<ConnectionParams> {
    let json = decrypt(key, sealed)?;
    Ok(serde_json::from_slice(&json)?)
}
