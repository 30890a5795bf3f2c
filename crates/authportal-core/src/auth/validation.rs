//! Local form validation. Nothing here touches the network.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Minimum signup password length
const MIN_PASSWORD_LENGTH: usize = 6;

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid"));

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please enter your name")]
    MissingName,

    #[error("Please enter a valid email address")]
    InvalidEmail,

    #[error("Please enter your password")]
    MissingPassword,

    #[error("Password must be at least 6 characters long and contain at least one number")]
    WeakPassword,

    #[error("Please enter a valid API URL")]
    MissingApiUrl,
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}

/// Signup strength rule: at least 6 characters and at least one digit
pub fn is_strong_password(password: &str) -> bool {
    password.chars().count() >= MIN_PASSWORD_LENGTH && password.chars().any(|c| c.is_ascii_digit())
}

/// Login only needs a well-formed email and some password
pub fn validate_login(email: &str, password: &str) -> Result<(), ValidationError> {
    if !is_valid_email(email) {
        return Err(ValidationError::InvalidEmail);
    }
    if password.is_empty() {
        return Err(ValidationError::MissingPassword);
    }
    Ok(())
}

pub fn validate_signup(name: &str, email: &str, password: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::MissingName);
    }
    if !is_valid_email(email) {
        return Err(ValidationError::InvalidEmail);
    }
    if !is_strong_password(password) {
        return Err(ValidationError::WeakPassword);
    }
    Ok(())
}
