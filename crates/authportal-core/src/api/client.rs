//! API client for communicating with the authentication REST API.
//!
//! Every method performs exactly one HTTP request. Retry and refresh policy
//! belongs to `SessionManager`, not here.

use std::time::Duration;

use reqwest::{Client, Response, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::auth::TokenPair;
use crate::config::normalize_api_url;
use crate::models::{Role, User};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// A hung auth check would otherwise block the session forever.
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Timeout for `/health` probes during API URL detection
const HEALTH_TIMEOUT_SECS: u64 = 3;

#[derive(Debug, Deserialize)]
struct TokensResponse {
    tokens: TokenPair,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    user: User,
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    #[serde(default)]
    users: Vec<User>,
}

#[derive(Debug, Serialize)]
struct SignupRequest<'a> {
    name: &'a str,
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshTokenRequest<'a> {
    #[serde(rename = "refreshToken")]
    refresh_token: &'a str,
}

#[derive(Debug, Serialize)]
struct RoleRequest {
    role: Role,
}

/// API client for the authentication service.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client for `base_url`
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    /// Create a client whose requests give up after `timeout`.
    /// A timed-out request surfaces as a transport error.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: normalize_api_url(base_url),
        })
    }

    /// Create a client for another base URL, sharing the connection pool.
    pub fn with_base_url(&self, base_url: &str) -> Self {
        Self {
            client: self.client.clone(), // Cheap clone, shares connection pool
            base_url: normalize_api_url(base_url),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// URL for a single user, with `user_id` encoded as one path segment
    fn user_url(&self, user_id: &str, tail: &[&str]) -> Result<Url, ApiError> {
        if user_id.is_empty() {
            return Err(ApiError::InvalidRequest("user id is empty".to_string()));
        }

        let mut url = Url::parse(&self.url("/api/users"))
            .map_err(|e| ApiError::InvalidRequest(format!("bad API URL {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidRequest(format!("bad API URL {}", self.base_url)))?
            .push(user_id)
            .extend(tail);
        Ok(url)
    }

    /// Browser entry point for Google sign-in; the API redirects back with tokens
    pub fn google_auth_url(&self) -> String {
        self.url("/api/auth/google")
    }

    /// Return the response if successful, otherwise map status and body to an error
    async fn check_response(response: Response, fallback: &str) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body, fallback))
        }
    }

    /// Same as `check_response`, but a 401 means the bearer token expired
    async fn check_bearer_response(response: Response, fallback: &str) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_bearer_status(status, &body, fallback))
        }
    }

    async fn parse<T: DeserializeOwned>(response: Response, what: &str) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse {} response: {}", what, e)))
    }

    async fn post_for_tokens<B: Serialize>(
        &self,
        path: &str,
        body: &B,
        fallback: &str,
    ) -> Result<TokenPair, ApiError> {
        let url = self.url(path);
        debug!(url = %url, "POST");

        let response = self.client.post(&url).json(body).send().await?;
        let response = Self::check_response(response, fallback).await?;
        let parsed: TokensResponse = Self::parse(response, path).await?;
        Ok(parsed.tokens)
    }

    // ===== Auth Endpoints =====

    pub async fn signup(&self, name: &str, email: &str, password: &str) -> Result<TokenPair, ApiError> {
        let body = SignupRequest { name, email, password };
        self.post_for_tokens("/api/auth/signup", &body, "Signup failed").await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, ApiError> {
        let body = LoginRequest { email, password };
        self.post_for_tokens("/api/auth/login", &body, "Login failed").await
    }

    /// Exchange a refresh token for a new token pair
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        let body = RefreshTokenRequest { refresh_token };
        self.post_for_tokens("/api/auth/refresh-token", &body, "Token refresh failed")
            .await
    }

    /// Revoke a refresh token server-side. The response body is ignored.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), ApiError> {
        let url = self.url("/api/auth/logout");
        debug!(url = %url, "POST");

        let response = self
            .client
            .post(&url)
            .json(&RefreshTokenRequest { refresh_token })
            .send()
            .await?;
        Self::check_response(response, "Logout failed").await?;
        Ok(())
    }

    // ===== User Endpoints =====

    pub async fn current_user(&self, access_token: &str) -> Result<User, ApiError> {
        let url = self.url("/api/users/me");
        debug!(url = %url, "GET");

        let response = self.client.get(&url).bearer_auth(access_token).send().await?;
        let response = Self::check_bearer_response(response, "Failed to load user").await?;
        let parsed: UserResponse = Self::parse(response, "/api/users/me").await?;
        Ok(parsed.user)
    }

    pub async fn list_users(&self, access_token: &str) -> Result<Vec<User>, ApiError> {
        let url = self.url("/api/users");
        debug!(url = %url, "GET");

        let response = self.client.get(&url).bearer_auth(access_token).send().await?;
        let response = Self::check_bearer_response(response, "Failed to fetch users").await?;
        let parsed: UsersResponse = Self::parse(response, "/api/users").await?;
        Ok(parsed.users)
    }

    pub async fn set_user_role(&self, access_token: &str, user_id: &str, role: Role) -> Result<(), ApiError> {
        let url = self.user_url(user_id, &["role"])?;
        debug!(url = %url, role = %role, "PATCH");

        let response = self
            .client
            .patch(url)
            .bearer_auth(access_token)
            .json(&RoleRequest { role })
            .send()
            .await?;
        Self::check_bearer_response(response, "Failed to update user role").await?;
        Ok(())
    }

    pub async fn delete_user(&self, access_token: &str, user_id: &str) -> Result<(), ApiError> {
        let url = self.user_url(user_id, &[])?;
        debug!(url = %url, "DELETE");

        let response = self.client.delete(url).bearer_auth(access_token).send().await?;
        Self::check_bearer_response(response, "Failed to delete user").await?;
        Ok(())
    }

    /// Probe `/health` with a short timeout. Any failure counts as unhealthy.
    pub async fn is_healthy(&self) -> bool {
        let url = self.url("/health");
        let result = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(HEALTH_TIMEOUT_SECS))
            .send()
            .await;

        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url = %url, error = %e, "Health probe failed");
                false
            }
        }
    }
}
