use std::sync::Arc;

use chrono::Utc;

use super::codec::{expiry_after, CredentialCodec};
use super::error::{CodecError, IssuanceError};
use super::ledger::RevocationLedger;
use super::store::StoredCredentialPair;
use super::token::SessionPayload;
use crate::config::{SessionConfig, DEFAULT_ACCESS_TTL_SECS, DEFAULT_REFRESH_TTL_SECS};

/// Mints a fresh (access, refresh) pair at sign-in.
///
/// Issuance is all-or-nothing: the pair is returned only after the refresh
/// token is registered with the ledger. Persisting it is the caller's job.
pub struct TokenIssuer {
    codec: Arc<CredentialCodec>,
    ledger: Arc<dyn RevocationLedger>,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
}

impl TokenIssuer {
    pub fn new(codec: Arc<CredentialCodec>, ledger: Arc<dyn RevocationLedger>) -> Self {
        Self {
            codec,
            ledger,
            access_ttl_secs: DEFAULT_ACCESS_TTL_SECS,
            refresh_ttl_secs: DEFAULT_REFRESH_TTL_SECS,
        }
    }

    pub fn from_config(
        config: &SessionConfig,
        codec: Arc<CredentialCodec>,
        ledger: Arc<dyn RevocationLedger>,
    ) -> Self {
        Self::new(codec, ledger).with_ttls(config.access_ttl_secs, config.refresh_ttl_secs)
    }

    pub fn with_ttls(mut self, access_ttl_secs: u64, refresh_ttl_secs: u64) -> Self {
        self.access_ttl_secs = access_ttl_secs;
        self.refresh_ttl_secs = refresh_ttl_secs;
        self
    }

    pub async fn issue(&self, payload: &SessionPayload) -> Result<StoredCredentialPair, IssuanceError> {
        let now = Utc::now();
        let access_expiry = expiry_after(now, self.access_ttl_secs)
            .ok_or_else(|| out_of_range("access"))?;
        let refresh_expiry = expiry_after(now, self.refresh_ttl_secs)
            .ok_or_else(|| out_of_range("refresh"))?;

        let access_token = self
            .codec
            .encode(payload, access_expiry)
            .map_err(IssuanceError::Encoding)?;
        let refresh_token = self
            .codec
            .encode_refresh(payload, refresh_expiry)
            .map_err(IssuanceError::Encoding)?;

        self.ledger
            .register_refresh_token(&refresh_token, &payload.user_id)
            .await
            .map_err(|err| {
                tracing::warn!(user_id = %payload.user_id, error = %err, "refresh token registration failed");
                IssuanceError::Registration(err)
            })?;

        tracing::info!(user_id = %payload.user_id, role = %payload.role, "issued session credentials");
        Ok(StoredCredentialPair::new(access_token, refresh_token))
    }
}

fn out_of_range(which: &str) -> IssuanceError {
    IssuanceError::Encoding(CodecError::Encoding(format!(
        "{which} token expiry out of range"
    )))
}
