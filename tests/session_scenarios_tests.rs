//! End-to-end session behavior through the controller: sign-in, silent
//! refresh, remote revocation, sign-out and the background listener.

mod auth_support;

use std::time::Duration;

use ballot_session::auth::{
    CredentialCodec, CredentialStore, IssuanceError, RevocationLedger, StoredCredentialPair,
    UserRole,
};
use ballot_session::config::SessionConfig;
use ballot_session::error::SessionError;
use ballot_session::session::SessionState;
use chrono::Utc;
use futures::future::join_all;
use pretty_assertions::assert_eq;

use auth_support::{assert_pair_invariant, expired_pair, harness, harness_with, payload, SECRET};

const WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fresh_sign_in_persists_pair_and_authenticates() {
    let h = harness();

    let state = h.controller.sign_in(payload()).await.expect("sign in");

    let pair = h.store.get().unwrap().expect("pair stored");
    assert!(pair.is_complete());
    assert!(h.ledger.inner.contains(&pair.refresh_token));
    assert_eq!(state.user_id(), Some("u1"));
    assert_eq!(state.user_email(), Some("a@x.com"));
    assert_eq!(state.user_role(), Some(UserRole::Standard));
    assert!(!state.is_loading_auth);
    assert_eq!(h.controller.state(), state);
}

#[tokio::test]
async fn expired_access_with_live_refresh_rotates_silently() {
    let h = harness();
    let pair = expired_pair();
    h.store.set(&pair).unwrap();
    h.ledger
        .register_refresh_token(&pair.refresh_token, "u1")
        .await
        .unwrap();

    let state = h.controller.recompute().await;

    let stored = h.store.get().unwrap().expect("pair kept");
    assert_ne!(stored.access_token, pair.access_token);
    assert_eq!(stored.refresh_token, pair.refresh_token);
    assert!(state.is_authenticated());
    assert_eq!(state.user_id(), Some("u1"));
}

#[tokio::test]
async fn expired_access_with_deleted_refresh_signs_out() {
    let h = harness();
    let pair = expired_pair();
    h.store.set(&pair).unwrap();

    let state = h.controller.recompute().await;

    assert!(h.store.get().unwrap().is_none());
    assert!(!state.is_authenticated());
    assert!(!state.is_loading_auth);
}

#[tokio::test]
async fn sign_out_removes_ledger_row_and_store() {
    let h = harness();
    h.controller.sign_in(payload()).await.expect("sign in");
    let pair = h.store.get().unwrap().expect("pair stored");

    h.controller.sign_out().await.expect("sign out");

    assert!(!h.ledger.inner.contains(&pair.refresh_token));
    assert!(h.store.get().unwrap().is_none());
    let state = h.controller.state();
    assert!(!state.is_authenticated());
    assert!(!state.is_loading_auth);
}

#[tokio::test]
async fn sign_out_twice_is_harmless() {
    let h = harness();
    h.controller.sign_in(payload()).await.expect("sign in");

    h.controller.sign_out().await.expect("first sign out");
    h.controller.sign_out().await.expect("second sign out");

    assert!(h.store.get().unwrap().is_none());
    assert!(h.ledger.inner.is_empty());
}

#[tokio::test]
async fn sign_out_survives_ledger_outage() {
    let h = harness();
    h.controller.sign_in(payload()).await.expect("sign in");
    h.ledger.set_offline(true);

    h.controller.sign_out().await.expect("sign out");

    assert!(h.store.get().unwrap().is_none());
    assert!(!h.controller.state().is_authenticated());
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sign_in_fails_cleanly_when_ledger_is_down() {
    let h = harness();
    h.ledger.set_offline(true);

    let err = h.controller.sign_in(payload()).await.unwrap_err();

    assert!(matches!(
        err,
        SessionError::Issuance(IssuanceError::Registration(_))
    ));
    assert!(h.store.get().unwrap().is_none());
    assert!(!h.controller.state().is_authenticated());
}

#[tokio::test]
async fn sign_in_rolls_back_registration_when_store_write_fails() {
    let h = harness();
    h.store.set_fail_writes(true);

    let err = h.controller.sign_in(payload()).await.unwrap_err();

    assert!(matches!(err, SessionError::Store(_)));
    assert!(h.ledger.inner.is_empty());
}

#[tokio::test]
async fn transient_ledger_failure_keeps_credentials_and_stays_loading() {
    let h = harness();
    let pair = expired_pair();
    h.store.set(&pair).unwrap();
    h.ledger
        .register_refresh_token(&pair.refresh_token, "u1")
        .await
        .unwrap();
    h.ledger.set_offline(true);

    let state = h.controller.recompute().await;

    assert_eq!(h.store.get().unwrap(), Some(pair.clone()));
    assert!(state.is_loading_auth);
    assert!(!state.is_authenticated());

    h.ledger.set_offline(false);
    let state = h.controller.recompute().await;
    assert!(state.is_authenticated());
}

#[tokio::test]
async fn tampered_access_token_signs_out() {
    let h = harness();
    let foreign = CredentialCodec::new(b"not-the-real-secret");
    let forged = foreign
        .encode(&payload(), Utc::now() + chrono::Duration::minutes(10))
        .unwrap();
    let pair = StoredCredentialPair::new(forged, expired_pair().refresh_token);
    h.store.set(&pair).unwrap();

    let state = h.controller.recompute().await;

    assert!(!state.is_authenticated());
    assert!(h.store.get().unwrap().is_none());
}

#[tokio::test]
async fn pair_invariant_holds_across_transitions() {
    let h = harness();
    assert_pair_invariant(h.store.as_ref());

    h.controller.sign_in(payload()).await.unwrap();
    assert_pair_invariant(h.store.as_ref());

    let expired = expired_pair();
    h.store.set(&expired).unwrap();
    h.ledger
        .register_refresh_token(&expired.refresh_token, "u1")
        .await
        .unwrap();
    h.controller.recompute().await;
    assert_pair_invariant(h.store.as_ref());

    h.ledger.inner.revoke_user("u1");
    h.store.set(&expired).unwrap();
    h.controller.recompute().await;
    assert_pair_invariant(h.store.as_ref());

    h.controller.sign_out().await.unwrap();
    assert_pair_invariant(h.store.as_ref());
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

async fn concurrent_refreshes(single_flight: bool) -> (usize, Vec<Option<String>>) {
    let h = harness_with(
        SessionConfig::builder()
            .jwt_secret(SECRET)
            .single_flight(single_flight)
            .build(),
    );
    let pair = expired_pair();
    h.store.set(&pair).unwrap();
    h.ledger
        .register_refresh_token(&pair.refresh_token, "u1")
        .await
        .unwrap();
    h.ledger.set_lookup_delay(Duration::from_millis(50));

    let tokens = join_all((0..8).map(|_| h.controller.authorized_token())).await;
    (h.ledger.lookups(), tokens)
}

#[tokio::test]
async fn concurrent_refreshes_share_one_ledger_lookup() {
    let (lookups, tokens) = concurrent_refreshes(true).await;

    assert_eq!(lookups, 1);
    let first = tokens[0].clone().expect("authorized");
    assert!(tokens.iter().all(|token| token.as_deref() == Some(first.as_str())));
}

#[tokio::test]
async fn without_single_flight_every_caller_hits_the_ledger() {
    let (lookups, tokens) = concurrent_refreshes(false).await;

    assert_eq!(lookups, 8);
    assert!(tokens.iter().all(Option::is_some));
}

#[tokio::test]
async fn concurrent_refreshes_share_a_ledger_failure() {
    let h = harness();
    let pair = expired_pair();
    h.store.set(&pair).unwrap();
    h.ledger
        .register_refresh_token(&pair.refresh_token, "u1")
        .await
        .unwrap();
    h.ledger.set_offline(true);
    h.ledger.set_lookup_delay(Duration::from_millis(50));

    let tokens = join_all((0..8).map(|_| h.controller.authorized_token())).await;

    assert_eq!(h.ledger.lookups(), 1);
    assert!(tokens.iter().all(Option::is_none));
    assert_eq!(h.store.get().unwrap(), Some(pair));

    // Once the shared attempt is over, the next caller asks the ledger again.
    h.ledger.set_offline(false);
    assert!(h.controller.authorized_token().await.is_some());
    assert_eq!(h.ledger.lookups(), 2);
}

#[tokio::test]
async fn slow_refresh_does_not_clear_a_newer_sign_in() {
    let h = harness();
    let stale = expired_pair();
    h.store.set(&stale).unwrap();
    h.ledger
        .register_refresh_token(&stale.refresh_token, "u1")
        .await
        .unwrap();
    h.ledger.set_lookup_delay(Duration::from_millis(100));

    let refresh = h.controller.authorized_token();
    let reauthenticate = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.controller.sign_out().await.expect("sign out");
        h.controller.sign_in(payload()).await.expect("sign in")
    };
    let (token, state) = tokio::join!(refresh, reauthenticate);

    let current = h.store.get().unwrap().expect("new session kept");
    assert_ne!(current.refresh_token, stale.refresh_token);
    assert_eq!(token.as_deref(), Some(current.access_token.as_str()));
    assert!(state.is_authenticated());
}

#[tokio::test]
async fn require_token_reports_revocation() {
    let h = harness();
    h.store.set(&expired_pair()).unwrap();

    let err = h.controller.require_token().await.unwrap_err();

    assert!(matches!(err, SessionError::Revoked));
    assert!(h.store.get().unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Background listener
// ---------------------------------------------------------------------------

async fn wait_until<F>(h: &auth_support::Harness, predicate: F) -> SessionState
where
    F: FnMut(&SessionState) -> bool,
{
    let mut states = h.controller.watch();
    let state = tokio::time::timeout(WAIT, states.wait_for(predicate))
        .await
        .expect("state change in time")
        .expect("controller alive")
        .clone();
    state
}

#[tokio::test]
async fn start_publishes_initial_state() {
    let h = harness();
    assert!(h.controller.state().is_loading_auth);

    h.controller.start();

    let state = wait_until(&h, |state| !state.is_loading_auth).await;
    assert!(!state.is_authenticated());
    assert!(state.is_new_user);
    h.controller.shutdown();
}

#[tokio::test]
async fn started_controller_refreshes_stored_session() {
    let h = harness();
    let pair = expired_pair();
    h.store.set(&pair).unwrap();
    h.ledger
        .register_refresh_token(&pair.refresh_token, "u1")
        .await
        .unwrap();

    h.controller.start();

    let state = wait_until(&h, SessionState::is_authenticated).await;
    assert_eq!(state.user_id(), Some("u1"));
    let stored = h.store.get().unwrap().expect("pair kept");
    assert_ne!(stored.access_token, pair.access_token);
    h.controller.shutdown();
}

#[tokio::test]
async fn listener_reacts_to_external_clear() {
    let h = harness();
    h.controller.start();
    h.controller.sign_in(payload()).await.expect("sign in");
    wait_until(&h, SessionState::is_authenticated).await;

    h.store.clear().unwrap();
    h.controller.notifier().emit();

    let state = wait_until(&h, |state| !state.is_authenticated() && !state.is_loading_auth).await;
    assert_eq!(state.user, None);
    h.controller.shutdown();
}
