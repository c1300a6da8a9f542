//! One-time verification codes for email confirmation.

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;

use super::error::VerificationError;

pub const CODE_LENGTH: usize = 12;
pub const CODE_TTL_MINUTES: i64 = 10;

/// A short-lived alphanumeric code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationCode {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

impl VerificationCode {
    pub fn generate() -> Self {
        Self::generate_at(Utc::now())
    }

    pub fn generate_at(now: DateTime<Utc>) -> Self {
        let code = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(CODE_LENGTH)
            .map(char::from)
            .collect();
        Self {
            code,
            expires_at: now + Duration::minutes(CODE_TTL_MINUTES),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn validate(&self, input: &str) -> Result<(), VerificationError> {
        self.validate_at(input, Utc::now())
    }

    /// Expiry is checked first so a stale code never confirms, even when it
    /// matches.
    pub fn validate_at(&self, input: &str, now: DateTime<Utc>) -> Result<(), VerificationError> {
        if self.is_expired_at(now) {
            return Err(VerificationError::Expired);
        }
        if input.trim() != self.code {
            return Err(VerificationError::Mismatch);
        }
        Ok(())
    }
}
