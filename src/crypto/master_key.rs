//! Process-wide master key.
//!
//! Read from `EXPQL_MASTER_KEY` when set and valid. Otherwise a random key is
//! generated, which can only open params sealed by this same process.

use std::sync::OnceLock;
use tracing::warn;

use super::{decode_key, generate_master_key, CryptoResult, KEY_LENGTH};

/// Environment variable holding the base64 master key.
pub const MASTER_KEY_ENV: &str = "EXPQL_MASTER_KEY";

static MASTER_KEY: OnceLock<MasterKeyState> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct MasterKeyState {
    key: [u8; KEY_LENGTH],
    persistent: bool,
}

impl MasterKeyState {
    pub fn key(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// True when the key came from the environment.
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    fn from_env_value(
        value: Option<&str>,
        generate: impl FnOnce() -> CryptoResult<[u8; KEY_LENGTH]>,
    ) -> CryptoResult<Self> {
        if let Some(encoded) = value {
            match decode_key(encoded) {
                Ok(key) => return Ok(Self { key, persistent: true }),
                Err(e) => warn!(env = MASTER_KEY_ENV, error = %e, "invalid master key, using ephemeral key"),
            }
        }
        Ok(Self {
            key: generate()?,
            persistent: false,
        })
    }
}

/// Initialize the master key once; later calls return the same state.
///
/// Fails when no key is configured and the system RNG cannot produce one.
pub fn init() -> CryptoResult<&'static MasterKeyState> {
    if let Some(state) = MASTER_KEY.get() {
        return Ok(state);
    }
    let value = std::env::var(MASTER_KEY_ENV).ok();
    let state = MasterKeyState::from_env_value(value.as_deref(), generate_master_key)?;
    Ok(MASTER_KEY.get_or_init(|| state))
}

/// The master key, if [`init`] has run.
pub fn get() -> Option<&'static MasterKeyState> {
    MASTER_KEY.get()
}
