//! Error classification and recovery hints.

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authentication,
    Revocation,
    Network,
    Storage,
    Configuration,
    Serialization,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    RetryWithBackoff,
    SignInAgain,
    CheckStorage,
    CheckConfiguration,
    ContactSupport,
}
