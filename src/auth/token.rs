use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Account role carried inside every credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    #[strum(serialize = "ADMIN")]
    Admin,
    #[strum(serialize = "TESTER")]
    Tester,
    /// Regular account. The backend calls this role `USER`.
    #[serde(rename = "USER", alias = "STANDARD")]
    #[strum(to_string = "USER", serialize = "STANDARD")]
    Standard,
}

/// Identity minted into a credential.
///
/// Immutable once signed: the same payload travels from the refresh token to
/// every access token re-issued from it.
///
/// # Example
/// ```
/// use ballot_session::auth::{SessionPayload, UserRole};
///
/// let payload = SessionPayload::new("u1", "a@x.com", UserRole::Standard);
/// assert_eq!(payload.role.to_string(), "USER");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    pub user_id: String,
    pub email: String,
    pub role: UserRole,
}

impl SessionPayload {
    pub fn new(user_id: impl Into<String>, email: impl Into<String>, role: UserRole) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
            role,
        }
    }
}

/// Signed claim set: the payload plus timing and the refresh marker.
///
/// `iat` and `exp` are seconds since the unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(flatten)]
    pub payload: SessionPayload,
    pub iat: i64,
    pub exp: i64,
    #[serde(
        rename = "isRefreshToken",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub is_refresh_token: bool,
}

impl Claims {
    /// Strips the refresh marker, leaving the identity only.
    pub fn into_payload(self) -> SessionPayload {
        self.payload
    }
}
