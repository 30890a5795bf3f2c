//! Core library for authportal.
//!
//! This crate owns everything the front-ends share:
//! - `api`: HTTP client for the remote authentication API
//! - `auth`: the `SessionManager` and the token lifecycle around it
//! - `config`: persisted client configuration with environment defaults
//! - `models`: user records returned by the API
//! - `storage`: the key-value persistence boundary and its backends

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod storage;

pub use api::{ApiClient, ApiError};
pub use auth::{SessionEvent, SessionManager, SessionState, TokenPair};
pub use config::{Config, Theme};
pub use models::{Role, User};
pub use storage::{FileStorage, KeyringStorage, MemoryStorage, Storage};
