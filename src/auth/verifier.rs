//! Verify-or-refresh state machine.
//!
//! Per attempt:
//!
//! ```text
//! NO_CREDENTIALS ──────────────────────────────► SIGNED_OUT
//! VALID_ACCESS ────────────────────────────────► AUTHENTICATED
//! EXPIRED_ACCESS ─► REFRESHING ─┬─ ledger hit ─► AUTHENTICATED (rotated)
//!                               ├─ ledger miss ► REVOKED ─► SIGNED_OUT
//!                               └─ ledger fault ► DEFERRED (store kept)
//! UNTRUSTED_ACCESS ────────────────────────────► REJECTED ─► SIGNED_OUT
//! ```
//!
//! Steps within one attempt run strictly in order: decode, ledger lookup,
//! re-mint, store write, notify.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;

use super::codec::{expiry_after, CredentialCodec};
use super::error::{CodecError, RefreshError};
use super::ledger::RevocationLedger;
use super::notifier::ChangeNotifier;
use super::store::{CredentialStore, StoredCredentialPair};
use crate::config::{SessionConfig, DEFAULT_ACCESS_TTL_SECS};
use crate::error::SessionError;

/// Result of one verify-or-refresh attempt.
#[derive(Debug, Clone)]
pub enum VerifyOutcome {
    /// No complete pair is stored.
    SignedOut,
    /// `access_token` is valid now. `rotated` is set when it differs from the
    /// stored token the attempt started with.
    Authenticated { access_token: String, rotated: bool },
    /// The refresh token is no longer in the ledger. The store was cleared.
    Revoked,
    /// The access token cannot be trusted. The store was cleared.
    Rejected(CodecError),
    /// A transient fault interrupted the refresh. The store was left intact.
    Deferred(RefreshError),
}

impl VerifyOutcome {
    pub fn access_token(&self) -> Option<&str> {
        match self {
            Self::Authenticated { access_token, .. } => Some(access_token),
            _ => None,
        }
    }

    pub fn into_access_token(self) -> Option<String> {
        match self {
            Self::Authenticated { access_token, .. } => Some(access_token),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }

    /// The access token, or the reason there is none.
    pub fn into_result(self) -> Result<String, SessionError> {
        match self {
            Self::Authenticated { access_token, .. } => Ok(access_token),
            Self::SignedOut => Err(SessionError::SignedOut),
            Self::Revoked => Err(SessionError::Revoked),
            Self::Rejected(err) => Err(SessionError::Codec(err)),
            Self::Deferred(err) => Err(SessionError::Refresh(err)),
        }
    }
}

/// One in-progress refresh. The first holder records its outcome so callers
/// queued behind it return that instead of asking the ledger again.
type Flight = Arc<tokio::sync::Mutex<Option<VerifyOutcome>>>;

/// Leaves the flight when dropped, including when the refreshing future is
/// cancelled.
struct FlightTicket<'a> {
    verifier: &'a TokenVerifier,
    refresh_token: &'a str,
    flight: Flight,
}

impl Drop for FlightTicket<'_> {
    fn drop(&mut self) {
        let flight = std::mem::take(&mut self.flight);
        self.verifier.leave_flight(self.refresh_token, flight);
    }
}

/// Returns a currently valid access token for the stored pair, re-minting it
/// through the revocation ledger when it has expired.
pub struct TokenVerifier {
    codec: Arc<CredentialCodec>,
    ledger: Arc<dyn RevocationLedger>,
    store: Arc<dyn CredentialStore>,
    notifier: Arc<ChangeNotifier>,
    access_ttl_secs: u64,
    flights: Option<Mutex<HashMap<String, Flight>>>,
}

impl TokenVerifier {
    pub fn new(
        codec: Arc<CredentialCodec>,
        ledger: Arc<dyn RevocationLedger>,
        store: Arc<dyn CredentialStore>,
        notifier: Arc<ChangeNotifier>,
    ) -> Self {
        Self {
            codec,
            ledger,
            store,
            notifier,
            access_ttl_secs: DEFAULT_ACCESS_TTL_SECS,
            flights: Some(Mutex::new(HashMap::new())),
        }
    }

    pub fn from_config(
        config: &SessionConfig,
        codec: Arc<CredentialCodec>,
        ledger: Arc<dyn RevocationLedger>,
        store: Arc<dyn CredentialStore>,
        notifier: Arc<ChangeNotifier>,
    ) -> Self {
        Self::new(codec, ledger, store, notifier)
            .with_access_ttl(config.access_ttl_secs)
            .with_single_flight(config.single_flight)
    }

    pub fn with_access_ttl(mut self, access_ttl_secs: u64) -> Self {
        self.access_ttl_secs = access_ttl_secs;
        self
    }

    /// Serialize refreshes per refresh token so concurrent callers share one
    /// ledger round trip. On by default.
    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.flights = enabled.then(|| Mutex::new(HashMap::new()));
        self
    }

    /// Read the store and run one attempt on what it holds.
    pub async fn verify_stored(&self) -> VerifyOutcome {
        match self.store.get() {
            Ok(pair) => self.verify_or_refresh(pair.as_ref()).await,
            Err(err) => {
                tracing::warn!(error = %err, "credential store unreadable");
                VerifyOutcome::Deferred(RefreshError::Store(err))
            }
        }
    }

    /// Bearer token for an authenticated request, if the session is usable.
    pub async fn authorized_token(&self) -> Option<String> {
        self.verify_stored().await.into_access_token()
    }

    /// Like [`authorized_token`](Self::authorized_token), but says why no
    /// token is available.
    pub async fn require_token(&self) -> Result<String, SessionError> {
        self.verify_stored().await.into_result()
    }

    /// Run one attempt on a snapshot of the stored pair.
    pub async fn verify_or_refresh(&self, pair: Option<&StoredCredentialPair>) -> VerifyOutcome {
        let Some(pair) = pair.filter(|pair| pair.is_complete()) else {
            tracing::debug!("no credentials stored");
            return VerifyOutcome::SignedOut;
        };

        match self.codec.decode_claims(&pair.access_token) {
            Ok(claims) if claims.is_refresh_token => self.reject(
                pair,
                CodecError::Malformed("refresh token stored in access slot".to_string()),
            ),
            Ok(_) => VerifyOutcome::Authenticated {
                access_token: pair.access_token.clone(),
                rotated: false,
            },
            Err(CodecError::Expired) => self.refresh(pair).await,
            Err(err) => self.reject(pair, err),
        }
    }

    async fn refresh(&self, pair: &StoredCredentialPair) -> VerifyOutcome {
        let Some(flight) = self.join_flight(&pair.refresh_token) else {
            return self.refresh_via_ledger(pair).await;
        };
        let ticket = FlightTicket {
            verifier: self,
            refresh_token: &pair.refresh_token,
            flight,
        };

        let mut settled = ticket.flight.lock().await;
        if let Some(outcome) = settled.as_ref() {
            tracing::debug!("sharing outcome of concurrent refresh");
            return outcome.clone();
        }
        let outcome = match self.settled_elsewhere(pair) {
            Some(outcome) => outcome,
            None => self.refresh_via_ledger(pair).await,
        };
        *settled = Some(outcome.clone());
        outcome
    }

    /// Before asking the ledger, see whether the store already moved past
    /// this snapshot.
    fn settled_elsewhere(&self, pair: &StoredCredentialPair) -> Option<VerifyOutcome> {
        let current = match self.store.get() {
            Ok(current) => current,
            Err(_) => return None,
        };
        let Some(current) = current.filter(|current| current.is_complete()) else {
            tracing::debug!("session ended while waiting for refresh");
            return Some(VerifyOutcome::SignedOut);
        };
        if current.refresh_token != pair.refresh_token {
            return Some(self.adopt(current));
        }
        if current.access_token == pair.access_token {
            return None;
        }
        match self.codec.decode_claims(&current.access_token) {
            Ok(claims) if !claims.is_refresh_token => {
                tracing::debug!("reusing access token rotated by concurrent refresh");
                Some(VerifyOutcome::Authenticated {
                    access_token: current.access_token,
                    rotated: true,
                })
            }
            _ => None,
        }
    }

    /// The store now holds a different session than the one this attempt
    /// started from. Report on that session without touching it.
    fn superseded(&self, pair: &StoredCredentialPair) -> Option<VerifyOutcome> {
        let current = self.store.get().ok().flatten()?;
        if !current.is_complete() || current.refresh_token == pair.refresh_token {
            return None;
        }
        Some(self.adopt(current))
    }

    fn adopt(&self, current: StoredCredentialPair) -> VerifyOutcome {
        tracing::debug!("credential store moved to a newer session");
        match self.codec.decode_claims(&current.access_token) {
            Ok(claims) if !claims.is_refresh_token => VerifyOutcome::Authenticated {
                access_token: current.access_token,
                rotated: true,
            },
            _ => VerifyOutcome::SignedOut,
        }
    }

    async fn refresh_via_ledger(&self, pair: &StoredCredentialPair) -> VerifyOutcome {
        let record = match self.ledger.find_by_token_value(&pair.refresh_token).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::warn!("refresh token not in ledger; session revoked");
                return self.revoke(pair);
            }
            Err(err) => {
                tracing::warn!(error = %err, "ledger lookup failed; keeping credentials for retry");
                return VerifyOutcome::Deferred(RefreshError::Ledger(err));
            }
        };

        // Trust the ledger's copy, not the one the caller handed us.
        let payload = match self.codec.decode_claims(&record.token) {
            Ok(claims) if claims.is_refresh_token => claims.into_payload(),
            Ok(_) => {
                tracing::warn!(user_id = %record.user_id, "ledger entry is not a refresh token");
                return self.revoke(pair);
            }
            Err(err) => {
                tracing::warn!(user_id = %record.user_id, error = %err, "ledger refresh token unusable");
                return self.revoke(pair);
            }
        };

        let access_token = match expiry_after(Utc::now(), self.access_ttl_secs)
            .ok_or_else(|| CodecError::Encoding("access token expiry out of range".to_string()))
            .and_then(|expires_at| self.codec.encode(&payload, expires_at))
        {
            Ok(token) => token,
            Err(err) => return VerifyOutcome::Deferred(RefreshError::Mint(err)),
        };

        if let Some(outcome) = self.superseded(pair) {
            return outcome;
        }
        let rotated = StoredCredentialPair::new(access_token, pair.refresh_token.clone());
        if let Err(err) = self.store.set(&rotated) {
            tracing::warn!(error = %err, "could not persist rotated access token");
            return VerifyOutcome::Deferred(RefreshError::Store(err));
        }
        self.notifier.emit();

        tracing::info!(user_id = %payload.user_id, "rotated access token");
        VerifyOutcome::Authenticated {
            access_token: rotated.access_token,
            rotated: true,
        }
    }

    fn revoke(&self, pair: &StoredCredentialPair) -> VerifyOutcome {
        if let Some(outcome) = self.superseded(pair) {
            return outcome;
        }
        self.end_session();
        VerifyOutcome::Revoked
    }

    fn reject(&self, pair: &StoredCredentialPair, err: CodecError) -> VerifyOutcome {
        tracing::warn!(error = %err, "stored access token rejected");
        if let Some(outcome) = self.superseded(pair) {
            return outcome;
        }
        self.end_session();
        VerifyOutcome::Rejected(err)
    }

    fn end_session(&self) {
        if let Err(err) = self.store.clear() {
            tracing::warn!(error = %err, "failed to clear credential store");
        }
        self.notifier.emit();
    }

    fn join_flight(&self, refresh_token: &str) -> Option<Flight> {
        let flights = self.flights.as_ref()?;
        let mut flights = flights.lock().unwrap_or_else(PoisonError::into_inner);
        Some(flights.entry(refresh_token.to_string()).or_default().clone())
    }

    fn leave_flight(&self, refresh_token: &str, flight: Flight) {
        let Some(flights) = self.flights.as_ref() else {
            return;
        };
        let mut flights = flights.lock().unwrap_or_else(PoisonError::into_inner);
        let ours = Arc::as_ptr(&flight);
        // Handles are only cloned and released under this lock, so once ours
        // is gone a count of one means nobody else is waiting.
        drop(flight);
        let idle = flights
            .get(refresh_token)
            .is_some_and(|current| Arc::as_ptr(current) == ours && Arc::strong_count(current) == 1);
        if idle {
            flights.remove(refresh_token);
        }
    }
}
