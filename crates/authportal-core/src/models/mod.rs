//! Data models for records returned by the authentication API.

pub mod user;

pub use user::{Role, User};
