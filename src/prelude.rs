//! Convenience re-exports for common use.

pub use crate::auth::{
    CredentialStore, InMemoryLedger, MemoryCredentialStore, RevocationLedger, SessionPayload,
    StoredCredentialPair, UserRole, VerifyOutcome,
};
pub use crate::config::{Environment, SessionConfig};
pub use crate::error::{Result, SessionError};
pub use crate::session::{SessionController, SessionState};
