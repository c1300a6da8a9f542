use serde::{Deserialize, Serialize};

use crate::auth::token::{SessionPayload, UserRole};

/// What the rest of the app sees of the session.
///
/// Only the controller builds these; every value is derived from the stored
/// credential pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub user: Option<SessionPayload>,
    pub is_loading_auth: bool,
    pub is_new_user: bool,
}

impl SessionState {
    /// State at process start, before the first verification completes.
    pub fn loading(is_new_user: bool) -> Self {
        Self {
            user: None,
            is_loading_auth: true,
            is_new_user,
        }
    }

    pub fn signed_out(is_new_user: bool) -> Self {
        Self {
            user: None,
            is_loading_auth: false,
            is_new_user,
        }
    }

    pub fn authenticated(user: SessionPayload, is_new_user: bool) -> Self {
        Self {
            user: Some(user),
            is_loading_auth: false,
            is_new_user,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|user| user.user_id.as_str())
    }

    pub fn user_email(&self) -> Option<&str> {
        self.user.as_ref().map(|user| user.email.as_str())
    }

    pub fn user_role(&self) -> Option<UserRole> {
        self.user.as_ref().map(|user| user.role)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::loading(false)
    }
}
