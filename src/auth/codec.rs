//! HS256 credential codec.
//!
//! Tokens are standard three-part JWTs signed with a shared secret. Decoding
//! checks the signature before the expiry, so a tampered token that is also
//! expired reports `InvalidSignature`.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};

use super::error::CodecError;
use super::token::{Claims, SessionPayload};
use crate::config::SessionConfig;

const ALGORITHM: Algorithm = Algorithm::HS256;

/// Signs and verifies access and refresh tokens.
pub struct CredentialCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for CredentialCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCodec")
            .field("algorithm", &ALGORITHM)
            .field("leeway", &self.validation.leeway)
            .finish()
    }
}

impl CredentialCodec {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.jwt_secret.as_bytes()).with_leeway(config.leeway_secs)
    }

    /// Seconds of clock skew tolerated when checking expiry.
    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.validation.leeway = leeway_secs;
        self
    }

    /// Sign an access token for `payload` that expires at `expires_at`.
    pub fn encode(
        &self,
        payload: &SessionPayload,
        expires_at: DateTime<Utc>,
    ) -> Result<String, CodecError> {
        self.encode_claims(&Claims {
            payload: payload.clone(),
            iat: Utc::now().timestamp(),
            exp: expires_at.timestamp(),
            is_refresh_token: false,
        })
    }

    /// Sign a refresh token: same payload, marked `isRefreshToken`.
    pub fn encode_refresh(
        &self,
        payload: &SessionPayload,
        expires_at: DateTime<Utc>,
    ) -> Result<String, CodecError> {
        self.encode_claims(&Claims {
            payload: payload.clone(),
            iat: Utc::now().timestamp(),
            exp: expires_at.timestamp(),
            is_refresh_token: true,
        })
    }

    pub fn encode_claims(&self, claims: &Claims) -> Result<String, CodecError> {
        jsonwebtoken::encode(&Header::new(ALGORITHM), claims, &self.encoding_key)
            .map_err(|err| CodecError::Encoding(err.to_string()))
    }

    /// Verify `token` and return its full claim set.
    pub fn decode_claims(&self, token: &str) -> Result<Claims, CodecError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }

    /// Verify `token` and return the identity it carries.
    pub fn decode(&self, token: &str) -> Result<SessionPayload, CodecError> {
        self.decode_claims(token).map(Claims::into_payload)
    }
}

/// `now + ttl_secs`, or `None` when the result does not fit a timestamp.
pub fn expiry_after(now: DateTime<Utc>, ttl_secs: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(ttl_secs).ok()?;
    now.checked_add_signed(Duration::try_seconds(secs)?)
}
