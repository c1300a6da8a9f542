use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::state::SessionState;
use crate::auth::codec::CredentialCodec;
use crate::auth::error::VerificationError;
use crate::auth::http_ledger::HttpLedger;
use crate::auth::issuer::TokenIssuer;
use crate::auth::ledger::RevocationLedger;
use crate::auth::notifier::ChangeNotifier;
use crate::auth::store::{CredentialStore, FileCredentialStore};
use crate::auth::token::SessionPayload;
use crate::auth::verification_code::VerificationCode;
use crate::auth::verifier::{TokenVerifier, VerifyOutcome};
use crate::config::{Environment, SessionConfig};
use crate::error::{Result, SessionError};

/// Owns the session lifecycle and publishes [`SessionState`].
///
/// State is recomputed from the credential store whenever the change
/// notifier fires. Observers read it with [`state`](Self::state) or follow it
/// with [`watch`](Self::watch).
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use ballot_session::auth::{InMemoryLedger, MemoryCredentialStore, SessionPayload, UserRole};
/// use ballot_session::config::SessionConfig;
/// use ballot_session::session::SessionController;
///
/// # async fn example() -> ballot_session::error::Result<()> {
/// let config = SessionConfig::builder().jwt_secret("change-me").build();
/// let controller = Arc::new(SessionController::new(
///     &config,
///     Arc::new(MemoryCredentialStore::new()),
///     Arc::new(InMemoryLedger::new()),
/// ));
/// controller.start();
///
/// let state = controller
///     .sign_in(SessionPayload::new("u1", "a@x.com", UserRole::Standard))
///     .await?;
/// assert_eq!(state.user_id(), Some("u1"));
/// # Ok(())
/// # }
/// ```
pub struct SessionController {
    codec: Arc<CredentialCodec>,
    store: Arc<dyn CredentialStore>,
    ledger: Arc<dyn RevocationLedger>,
    notifier: Arc<ChangeNotifier>,
    issuer: TokenIssuer,
    verifier: TokenVerifier,
    environment: Environment,
    is_new_user: bool,
    state_tx: watch::Sender<SessionState>,
    recompute_gate: tokio::sync::Mutex<()>,
    listener: Mutex<Option<JoinHandle<()>>>,
    pending_code: Mutex<Option<VerificationCode>>,
}

impl SessionController {
    pub fn new(
        config: &SessionConfig,
        store: Arc<dyn CredentialStore>,
        ledger: Arc<dyn RevocationLedger>,
    ) -> Self {
        let codec = Arc::new(CredentialCodec::from_config(config));
        let notifier = Arc::new(ChangeNotifier::new());
        let issuer = TokenIssuer::from_config(config, codec.clone(), ledger.clone());
        let verifier = TokenVerifier::from_config(
            config,
            codec.clone(),
            ledger.clone(),
            store.clone(),
            notifier.clone(),
        );
        let is_new_user = match store.has_signed_in_before() {
            Ok(seen) => !seen,
            Err(err) => {
                tracing::warn!(error = %err, "could not read first-run marker");
                false
            }
        };
        let (state_tx, _) = watch::channel(SessionState::loading(is_new_user));

        Self {
            codec,
            store,
            ledger,
            notifier,
            issuer,
            verifier,
            environment: config.environment,
            is_new_user,
            state_tx,
            recompute_gate: tokio::sync::Mutex::new(()),
            listener: Mutex::new(None),
            pending_code: Mutex::new(None),
        }
    }

    /// Wire up the file store and HTTP ledger named by `config`.
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        config.validate()?;
        let ledger_url = config.ledger_url.as_deref().ok_or_else(|| {
            SessionError::Configuration("ledger_url is required".to_string())
        })?;
        let store = Arc::new(FileCredentialStore::new(config.store_config()));
        let ledger = Arc::new(HttpLedger::new(ledger_url));
        Ok(Self::new(config, store, ledger))
    }

    pub fn notifier(&self) -> Arc<ChangeNotifier> {
        self.notifier.clone()
    }

    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Subscribe to the notifier and recompute on every signal, starting with
    /// one immediately.
    ///
    /// Calling `start` again replaces the running listener.
    pub fn start(self: &Arc<Self>) {
        let mut subscription = self.notifier.subscribe();
        let controller = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while subscription.changed().await {
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                controller.recompute().await;
            }
            tracing::debug!("session listener stopped");
        });

        let previous = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        self.notifier.emit();
    }

    /// Stop reacting to store changes. The published state is kept.
    pub fn shutdown(&self) {
        self.notifier.unsubscribe();
        let handle = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    pub fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Re-derive the session from the store and publish it.
    pub async fn recompute(&self) -> SessionState {
        let _gate = self.recompute_gate.lock().await;
        let is_new_user = self.is_new_user;

        let state = match self.verifier.verify_stored().await {
            VerifyOutcome::Authenticated { access_token, .. } => {
                match self.codec.decode(&access_token) {
                    Ok(user) => SessionState::authenticated(user, is_new_user),
                    // Expired between verification and now; the next signal
                    // will refresh it.
                    Err(err) => {
                        tracing::debug!(error = %err, "access token lapsed during recompute");
                        SessionState::loading(is_new_user)
                    }
                }
            }
            VerifyOutcome::Deferred(err) => {
                tracing::debug!(error = %err, "session check deferred");
                SessionState::loading(is_new_user)
            }
            VerifyOutcome::SignedOut | VerifyOutcome::Revoked | VerifyOutcome::Rejected(_) => {
                SessionState::signed_out(is_new_user)
            }
        };

        self.publish(state.clone());
        state
    }

    /// Mint, register and persist a new credential pair for `payload`.
    ///
    /// On failure nothing is persisted and the previous state is restored.
    pub async fn sign_in(&self, payload: SessionPayload) -> Result<SessionState> {
        let previous = self.state();
        self.set_loading();

        let pair = match self.issuer.issue(&payload).await {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(user_id = %payload.user_id, error = %err, "sign-in failed");
                self.publish(previous);
                return Err(err.into());
            }
        };

        if let Err(err) = self.store.set(&pair) {
            tracing::warn!(user_id = %payload.user_id, error = %err, "could not persist credentials");
            if let Err(cleanup) = self.ledger.delete_by_token_value(&pair.refresh_token).await {
                tracing::warn!(error = %cleanup, "orphaned refresh token left in ledger");
            }
            self.publish(previous);
            return Err(err.into());
        }

        if let Err(err) = self.store.mark_signed_in() {
            tracing::warn!(error = %err, "could not persist first-run marker");
        }

        tracing::info!(user_id = %payload.user_id, "signed in");
        self.notifier.emit();
        Ok(self.recompute().await)
    }

    /// End the session locally and in the ledger. Safe to call when already
    /// signed out.
    pub async fn sign_out(&self) -> Result<()> {
        self.set_loading();
        *self
            .pending_code
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;

        let stored = match self.store.get() {
            Ok(stored) => stored,
            Err(err) => {
                tracing::warn!(error = %err, "credential store unreadable during sign-out");
                None
            }
        };
        if let Some(pair) = stored.filter(|pair| !pair.refresh_token.is_empty()) {
            if let Err(err) = self.ledger.delete_by_token_value(&pair.refresh_token).await {
                tracing::warn!(error = %err, "could not remove refresh token from ledger");
            }
        }

        let cleared = self.store.clear();
        self.notifier.emit();
        self.publish(SessionState::signed_out(
            self.is_new_user,
        ));
        cleared?;

        tracing::info!("signed out");
        Ok(())
    }

    /// Bearer token for an authenticated backend request.
    pub async fn authorized_token(&self) -> Option<String> {
        self.verifier.authorized_token().await
    }

    /// Bearer token for a request that must not go out unauthenticated.
    ///
    /// Fails with [`SessionError::Revoked`] once the refresh token is gone
    /// from the ledger and with [`SessionError::SignedOut`] when nothing is
    /// stored.
    pub async fn require_token(&self) -> Result<String> {
        self.verifier.require_token().await
    }

    /// Replace any outstanding verification code with a fresh one.
    pub fn generate_verification_code(&self) -> VerificationCode {
        let code = VerificationCode::generate();
        *self
            .pending_code
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(code.clone());
        code
    }

    /// Check `input` against the outstanding code. A successful match
    /// consumes it.
    pub fn validate_verification_code(&self, input: &str) -> Result<()> {
        let mut pending = self
            .pending_code
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let code = pending.as_ref().ok_or(VerificationError::Missing)?;
        match code.validate(input) {
            Ok(()) => {
                *pending = None;
                Ok(())
            }
            Err(VerificationError::Expired) => {
                *pending = None;
                Err(VerificationError::Expired.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn set_loading(&self) {
        self.state_tx.send_modify(|state| state.is_loading_auth = true);
    }

    fn publish(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(handle) = self
            .listener
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ledger::InMemoryLedger;
    use crate::auth::store::MemoryCredentialStore;
    use crate::auth::token::UserRole;

    fn controller() -> (SessionController, Arc<MemoryCredentialStore>, Arc<InMemoryLedger>) {
        let config = SessionConfig::builder().jwt_secret("controller-secret").build();
        let store = Arc::new(MemoryCredentialStore::new());
        let ledger = Arc::new(InMemoryLedger::new());
        let controller = SessionController::new(&config, store.clone(), ledger.clone());
        (controller, store, ledger)
    }

    #[tokio::test]
    async fn starts_loading_and_flags_first_run() {
        let (controller, _, _) = controller();
        let state = controller.state();
        assert!(state.is_loading_auth);
        assert!(state.is_new_user);
        assert!(!state.is_authenticated());
    }

    #[tokio::test]
    async fn recompute_with_empty_store_is_signed_out() {
        let (controller, _, _) = controller();
        let state = controller.recompute().await;
        assert!(!state.is_loading_auth);
        assert!(!state.is_authenticated());
        assert_eq!(controller.state(), state);
    }

    #[tokio::test]
    async fn sign_in_marks_first_run_seen() {
        let (controller, store, _) = controller();
        controller
            .sign_in(SessionPayload::new("u1", "a@x.com", UserRole::Tester))
            .await
            .unwrap();
        assert!(store.has_signed_in_before().unwrap());
    }

    #[tokio::test]
    async fn verification_code_is_single_use() {
        let (controller, _, _) = controller();
        let code = controller.generate_verification_code();

        assert!(matches!(
            controller.validate_verification_code("wrong"),
            Err(SessionError::Verification(VerificationError::Mismatch))
        ));
        controller.validate_verification_code(&code.code).unwrap();
        assert!(matches!(
            controller.validate_verification_code(&code.code),
            Err(SessionError::Verification(VerificationError::Missing))
        ));
    }

    #[tokio::test]
    async fn new_code_replaces_outstanding_one() {
        let (controller, _, _) = controller();
        let first = controller.generate_verification_code();
        let second = controller.generate_verification_code();
        assert!(controller.validate_verification_code(&first.code).is_err());
        controller.validate_verification_code(&second.code).unwrap();
    }

    #[test]
    fn from_config_requires_a_ledger_url() {
        let config = SessionConfig::builder().jwt_secret("s").build();
        assert!(matches!(
            SessionController::from_config(&config),
            Err(SessionError::Configuration(_))
        ));
    }
}
