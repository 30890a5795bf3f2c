//! Key-value persistence boundary.
//!
//! The session layer reads and writes tokens and the config blob through the
//! `Storage` trait only. Backends:
//! - `MemoryStorage`: process-local map, used for tests and throwaway sessions
//! - `FileStorage`: JSON map on disk under the user config directory
//! - `KeyringStorage`: OS keychain entries via `keyring`

pub mod file;
pub mod keychain;
pub mod memory;

use anyhow::Result;

pub use file::FileStorage;
pub use keychain::KeyringStorage;
pub use memory::MemoryStorage;

/// Storage key for the access token
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Storage key for the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Storage key for the serialized configuration blob
pub const CONFIG_KEY: &str = "authportal-config";

pub trait Storage: Send + Sync {
    /// Read a value, `Ok(None)` if the key is absent
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}
