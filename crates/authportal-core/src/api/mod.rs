//! REST API client module for the authentication service.
//!
//! This module provides the `ApiClient` for the auth endpoints
//! (signup, login, token refresh, logout) and the user endpoints
//! (`/api/users/me` and the admin user management calls).
//!
//! User endpoints use bearer token authentication with the access token
//! obtained from login, signup, refresh, or the Google OAuth redirect.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;
