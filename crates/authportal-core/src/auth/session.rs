use crate::models::User;

/// Client-side belief about the current authentication state
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    #[default]
    Unauthenticated,
    /// A token refresh is in flight on the startup path
    Refreshing,
    Authenticated(User),
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            SessionState::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    /// Short label for status lines and logs
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Unauthenticated => "signed out",
            SessionState::Refreshing => "refreshing",
            SessionState::Authenticated(_) => "signed in",
        }
    }
}

/// Results from the periodic refresh task.
///
/// Sent through an MPSC channel from the background task to whichever front-end
/// took the receiver.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Fresh user list for the admin dashboard
    Users(Vec<User>),
    /// A periodic refresh failed; user-facing message
    Error(String),
}
