use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::storage::{Storage, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};

/// Access/refresh token pair issued by the API
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

// Tokens must never end up in logs
impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Reads and writes the token pair through the storage boundary.
///
/// Both tokens are written together and cleared together. `load` treats a
/// store holding only one of them as holding no pair; the single-token
/// accessors read their key as-is.
#[derive(Clone)]
pub struct CredentialStore {
    storage: Arc<dyn Storage>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn load(&self) -> Result<Option<TokenPair>> {
        let access = self.storage.get(ACCESS_TOKEN_KEY)?;
        let refresh = self.storage.get(REFRESH_TOKEN_KEY)?;
        Ok(match (access, refresh) {
            (Some(access), Some(refresh)) => Some(TokenPair::new(access, refresh)),
            _ => None,
        })
    }

    pub fn access_token(&self) -> Result<Option<String>> {
        self.storage.get(ACCESS_TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Result<Option<String>> {
        self.storage.get(REFRESH_TOKEN_KEY)
    }

    pub fn store(&self, tokens: &TokenPair) -> Result<()> {
        self.storage.set(ACCESS_TOKEN_KEY, &tokens.access_token)?;
        if let Err(e) = self.storage.set(REFRESH_TOKEN_KEY, &tokens.refresh_token) {
            // Never leave a half-written pair behind
            let _ = self.storage.remove(ACCESS_TOKEN_KEY);
            return Err(e);
        }
        Ok(())
    }

    /// Remove both tokens. Attempts both removals even if the first fails.
    pub fn clear(&self) -> Result<()> {
        let access = self.storage.remove(ACCESS_TOKEN_KEY);
        let refresh = self.storage.remove(REFRESH_TOKEN_KEY);
        access.and(refresh)
    }

    pub fn has_credentials(&self) -> bool {
        matches!(self.load(), Ok(Some(_)))
    }
}
