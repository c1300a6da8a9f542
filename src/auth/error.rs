use jsonwebtoken::errors::ErrorKind;
use thiserror::Error;

/// Failures while encoding or decoding a signed credential.
///
/// `Expired` is the only recoverable kind: it sends the caller down the
/// refresh path. `InvalidSignature` and `Malformed` mean the token cannot be
/// trusted at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Failed to encode token: {0}")]
    Encoding(String),
    #[error("Token expired")]
    Expired,
    #[error("Token signature does not match")]
    InvalidSignature,
    #[error("Malformed token: {0}")]
    Malformed(String),
}

impl CodecError {
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Expired)
    }

    /// True for failures that must end the session immediately.
    pub fn is_untrusted(&self) -> bool {
        matches!(self, Self::InvalidSignature | Self::Malformed(_))
    }
}

impl From<jsonwebtoken::errors::Error> for CodecError {
    fn from(error: jsonwebtoken::errors::Error) -> Self {
        match error.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            _ => Self::Malformed(error.to_string()),
        }
    }
}

/// Failures of the on-device credential slot.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Corrupt credential slot: {0}")]
    Corrupt(String),
}

impl From<std::io::Error> for StoreError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<toml::de::Error> for StoreError {
    fn from(error: toml::de::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::ser::Error> for StoreError {
    fn from(error: toml::ser::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Failures talking to the refresh-token revocation ledger.
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("Ledger network error: {0}")]
    Network(String),
    #[error("Ledger returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Invalid ledger response: {0}")]
    InvalidResponse(String),
}

impl LedgerError {
    /// Whether a later attempt could succeed without any change on our side.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { status, .. } => *status == 429 || (500..=599).contains(status),
            Self::InvalidResponse(_) => false,
        }
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::InvalidResponse(error.to_string())
        } else {
            Self::Network(error.to_string())
        }
    }
}

/// Minting a fresh credential pair failed; nothing was persisted.
#[derive(Debug, Error)]
pub enum IssuanceError {
    #[error("Token encoding failed: {0}")]
    Encoding(#[source] CodecError),
    #[error("Refresh token registration failed: {0}")]
    Registration(#[source] LedgerError),
}

/// A refresh attempt could not complete for a reason unrelated to revocation.
///
/// The stored pair is left untouched so the next attempt can retry.
#[derive(Debug, Clone, Error)]
pub enum RefreshError {
    #[error("Ledger lookup failed: {0}")]
    Ledger(#[source] LedgerError),
    #[error("Credential store unavailable: {0}")]
    Store(#[source] StoreError),
    #[error("Could not mint access token: {0}")]
    Mint(#[source] CodecError),
}

/// A one-time verification code was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("No verification code is outstanding")]
    Missing,
    #[error("Verification code does not match")]
    Mismatch,
    #[error("Verification code has expired")]
    Expired,
}
