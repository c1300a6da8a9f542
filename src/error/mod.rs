//! Error types for ballot-session.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

use crate::auth::error::{
    CodecError, IssuanceError, LedgerError, RefreshError, StoreError, VerificationError,
};

/// Primary error type for all session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Issuance(#[from] IssuanceError),

    #[error(transparent)]
    Refresh(#[from] RefreshError),

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error("No active session")]
    SignedOut,

    #[error("Refresh token has been revoked")]
    Revoked,
}

impl SessionError {
    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Codec(CodecError::Encoding(_)) => ErrorCategory::Serialization,
            Self::Codec(_) => ErrorCategory::Authentication,
            Self::Store(StoreError::Io(_)) => ErrorCategory::Storage,
            Self::Store(_) => ErrorCategory::Serialization,
            Self::Ledger(err) => ledger_category(err),
            Self::Issuance(IssuanceError::Encoding(_)) => ErrorCategory::Serialization,
            Self::Issuance(IssuanceError::Registration(err)) => ledger_category(err),
            Self::Refresh(RefreshError::Ledger(err)) => ledger_category(err),
            Self::Refresh(RefreshError::Store(_)) => ErrorCategory::Storage,
            Self::Refresh(RefreshError::Mint(_)) => ErrorCategory::Serialization,
            Self::Verification(_) | Self::SignedOut => ErrorCategory::Authentication,
            Self::Revoked => ErrorCategory::Revocation,
        }
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Ledger(err)
            | Self::Issuance(IssuanceError::Registration(err))
            | Self::Refresh(RefreshError::Ledger(err)) => err.is_retryable(),
            Self::Refresh(RefreshError::Store(_)) | Self::Store(StoreError::Io(_)) => true,
            _ => false,
        }
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        if self.is_retryable() {
            return RecoverySuggestion::RetryWithBackoff;
        }
        match self.category() {
            ErrorCategory::Authentication | ErrorCategory::Revocation => {
                RecoverySuggestion::SignInAgain
            }
            ErrorCategory::Storage => RecoverySuggestion::CheckStorage,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            _ => RecoverySuggestion::ContactSupport,
        }
    }
}

fn ledger_category(error: &LedgerError) -> ErrorCategory {
    match error {
        LedgerError::Network(_) => ErrorCategory::Network,
        LedgerError::Status { status: 401 | 403, .. } => ErrorCategory::Authentication,
        LedgerError::Status { .. } => ErrorCategory::Network,
        LedgerError::InvalidResponse(_) => ErrorCategory::Serialization,
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, SessionError>;
