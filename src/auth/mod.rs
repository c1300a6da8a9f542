//! Credential codec, storage, revocation ledger and the verify-or-refresh
//! machinery built on them.

pub mod codec;
pub mod error;
pub mod http_ledger;
pub mod issuer;
pub mod ledger;
pub mod notifier;
pub mod store;
pub mod token;
pub mod verification_code;
pub mod verifier;

pub use codec::CredentialCodec;
pub use error::{
    CodecError, IssuanceError, LedgerError, RefreshError, StoreError, VerificationError,
};
pub use http_ledger::HttpLedger;
pub use issuer::TokenIssuer;
pub use ledger::{InMemoryLedger, LedgerRecord, RevocationLedger};
pub use notifier::{ChangeNotifier, ChangeSubscription};
pub use store::{
    CredentialStore, CredentialStoreConfig, FileCredentialStore, MemoryCredentialStore,
    StoredCredentialPair,
};
pub use token::{Claims, SessionPayload, UserRole};
pub use verification_code::VerificationCode;
pub use verifier::{TokenVerifier, VerifyOutcome};
