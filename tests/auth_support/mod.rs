#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ballot_session::auth::{
    CredentialCodec, CredentialStore, InMemoryLedger, LedgerError, LedgerRecord,
    MemoryCredentialStore, RevocationLedger, SessionPayload, StoreError, StoredCredentialPair,
    UserRole,
};
use ballot_session::config::SessionConfig;
use ballot_session::session::SessionController;
use chrono::Utc;

pub const SECRET: &str = "integration-secret";

pub fn config() -> SessionConfig {
    SessionConfig::builder().jwt_secret(SECRET).build()
}

pub fn codec() -> CredentialCodec {
    CredentialCodec::new(SECRET.as_bytes())
}

pub fn payload() -> SessionPayload {
    SessionPayload::new("u1", "a@x.com", UserRole::Standard)
}

/// A pair whose access token expired a minute ago and whose refresh token is
/// good for a year. Nothing is registered.
pub fn expired_pair() -> StoredCredentialPair {
    let codec = codec();
    let access = codec
        .encode(&payload(), Utc::now() - chrono::Duration::minutes(1))
        .expect("encode access");
    let refresh = codec
        .encode_refresh(&payload(), Utc::now() + chrono::Duration::days(365))
        .expect("encode refresh");
    StoredCredentialPair::new(access, refresh)
}

/// Ledger wrapper that counts lookups and can be slowed down or taken
/// offline.
#[derive(Default)]
pub struct ObservedLedger {
    pub inner: InMemoryLedger,
    lookups: AtomicUsize,
    offline: AtomicBool,
    lookup_delay_ms: AtomicUsize,
}

impl ObservedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_lookup_delay(&self, delay: Duration) {
        self.lookup_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), LedgerError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(LedgerError::Network("ledger offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RevocationLedger for ObservedLedger {
    async fn register_refresh_token(&self, token: &str, user_id: &str) -> Result<(), LedgerError> {
        self.check_online()?;
        self.inner.register_refresh_token(token, user_id).await
    }

    async fn find_by_token_value(&self, token: &str) -> Result<Option<LedgerRecord>, LedgerError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let delay = self.lookup_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        self.check_online()?;
        self.inner.find_by_token_value(token).await
    }

    async fn delete_by_token_value(&self, token: &str) -> Result<(), LedgerError> {
        self.check_online()?;
        self.inner.delete_by_token_value(token).await
    }
}

/// Memory store whose writes can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryCredentialStore,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Io("disk full".to_string()))
        } else {
            Ok(())
        }
    }
}

impl CredentialStore for FlakyStore {
    fn get(&self) -> Result<Option<StoredCredentialPair>, StoreError> {
        self.inner.get()
    }

    fn set(&self, pair: &StoredCredentialPair) -> Result<(), StoreError> {
        self.check_writable()?;
        self.inner.set(pair)
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.check_writable()?;
        self.inner.clear()
    }

    fn has_signed_in_before(&self) -> Result<bool, StoreError> {
        self.inner.has_signed_in_before()
    }

    fn mark_signed_in(&self) -> Result<(), StoreError> {
        self.inner.mark_signed_in()
    }
}

pub struct Harness {
    pub controller: Arc<SessionController>,
    pub store: Arc<FlakyStore>,
    pub ledger: Arc<ObservedLedger>,
}

pub fn harness() -> Harness {
    harness_with(config())
}

pub fn harness_with(config: SessionConfig) -> Harness {
    let store = Arc::new(FlakyStore::new());
    let ledger = Arc::new(ObservedLedger::new());
    let controller = Arc::new(SessionController::new(
        &config,
        store.clone(),
        ledger.clone(),
    ));
    Harness {
        controller,
        store,
        ledger,
    }
}

/// Fails if the stored slot ever holds half a pair.
pub fn assert_pair_invariant(store: &dyn CredentialStore) {
    if let Some(pair) = store.get().expect("store readable") {
        assert!(
            pair.is_complete(),
            "store holds an incomplete pair: {pair:?}"
        );
    }
}
