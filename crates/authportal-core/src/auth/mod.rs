//! Authentication module: session lifecycle and credentials.
//!
//! This module provides:
//! - `SessionManager`: startup auth check, login/signup/logout, single-flight
//!   token refresh, the periodic refresh task, and admin user management
//! - `CredentialStore`: the token pair persisted through the storage boundary
//! - `validation`: local form checks run before any request is sent
//!
//! Access tokens are short-lived; a 401 triggers at most one refresh and one
//! retry per logical operation.

pub mod admin;
pub mod credentials;
pub mod manager;
pub mod session;
pub mod validation;

pub use credentials::{CredentialStore, TokenPair};
pub use manager::SessionManager;
pub use session::{SessionEvent, SessionState};
pub use validation::ValidationError;
