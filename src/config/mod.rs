//! Configuration system (layered: code > env > defaults).

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::auth::store::CredentialStoreConfig;
use crate::error::SessionError;

/// Access tokens live for 30 minutes.
pub const DEFAULT_ACCESS_TTL_SECS: u64 = 30 * 60;
/// Refresh tokens effectively never expire (100 years); revocation goes
/// through the ledger instead.
pub const DEFAULT_REFRESH_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Global default config (lazy-initialized from env).
static DEFAULT_CONFIG: OnceLock<SessionConfig> = OnceLock::new();

/// Backend environment the app talks to.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Environment {
    Dev,
    #[default]
    Prod,
}

/// Settings for the session core.
///
/// # Example
/// ```
/// use ballot_session::config::SessionConfig;
///
/// let config = SessionConfig::builder()
///     .jwt_secret("change-me")
///     .access_ttl_secs(600)
///     .build();
/// assert!(config.single_flight);
/// ```
#[derive(Clone, Builder)]
pub struct SessionConfig {
    /// HMAC secret shared with the backend authorizer.
    #[builder(into)]
    pub jwt_secret: String,
    #[builder(default = DEFAULT_ACCESS_TTL_SECS)]
    pub access_ttl_secs: u64,
    #[builder(default = DEFAULT_REFRESH_TTL_SECS)]
    pub refresh_ttl_secs: u64,
    /// Clock skew tolerated when checking expiry.
    #[builder(default)]
    pub leeway_secs: u64,
    #[builder(default = CredentialStoreConfig::default_dir())]
    pub store_dir: PathBuf,
    /// Base URL of the revocation ledger service.
    #[builder(into)]
    pub ledger_url: Option<String>,
    /// Collapse concurrent refreshes of one refresh token into a single
    /// ledger round trip.
    #[builder(default = true)]
    pub single_flight: bool,
    #[builder(default)]
    pub environment: Environment,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("jwt_secret", &"<redacted>")
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .field("leeway_secs", &self.leeway_secs)
            .field("store_dir", &self.store_dir)
            .field("ledger_url", &self.ledger_url)
            .field("single_flight", &self.single_flight)
            .field("environment", &self.environment)
            .finish()
    }
}

impl SessionConfig {
    /// Load from environment variables, reading `.env` first if present.
    ///
    /// `JWT_SECRET` is required. Optional: `BALLOT_ACCESS_TTL_SECS`,
    /// `BALLOT_REFRESH_TTL_SECS`, `BALLOT_JWT_LEEWAY_SECS`, `BALLOT_STORE_DIR`,
    /// `BALLOT_LEDGER_URL`, `BALLOT_SINGLE_FLIGHT`, `BALLOT_ENV`.
    pub fn from_env() -> Result<Self, SessionError> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SessionError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("JWT_SECRET")
            .filter(|secret| !secret.is_empty())
            .ok_or_else(|| SessionError::Configuration("JWT_SECRET is not set".to_string()))?;

        let config = Self {
            jwt_secret,
            access_ttl_secs: parse_var(&lookup, "BALLOT_ACCESS_TTL_SECS")?
                .unwrap_or(DEFAULT_ACCESS_TTL_SECS),
            refresh_ttl_secs: parse_var(&lookup, "BALLOT_REFRESH_TTL_SECS")?
                .unwrap_or(DEFAULT_REFRESH_TTL_SECS),
            leeway_secs: parse_var(&lookup, "BALLOT_JWT_LEEWAY_SECS")?.unwrap_or(0),
            store_dir: lookup("BALLOT_STORE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(CredentialStoreConfig::default_dir),
            ledger_url: lookup("BALLOT_LEDGER_URL").filter(|url| !url.is_empty()),
            single_flight: parse_var(&lookup, "BALLOT_SINGLE_FLIGHT")?.unwrap_or(true),
            environment: parse_var(&lookup, "BALLOT_ENV")?.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Get (or create) the global default config.
    pub fn global() -> Result<&'static SessionConfig, SessionError> {
        if let Some(config) = DEFAULT_CONFIG.get() {
            return Ok(config);
        }
        let config = Self::from_env()?;
        Ok(DEFAULT_CONFIG.get_or_init(|| config))
    }

    /// Reject settings that cannot produce valid tokens.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.jwt_secret.is_empty() {
            return Err(SessionError::Configuration(
                "jwt_secret must not be empty".to_string(),
            ));
        }
        if self.access_ttl_secs == 0 {
            return Err(SessionError::Configuration(
                "access_ttl_secs must be positive".to_string(),
            ));
        }
        if self.refresh_ttl_secs < self.access_ttl_secs {
            return Err(SessionError::Configuration(
                "refresh_ttl_secs must not be shorter than access_ttl_secs".to_string(),
            ));
        }
        Ok(())
    }

    pub fn store_config(&self) -> CredentialStoreConfig {
        CredentialStoreConfig::new(self.store_dir.clone())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, SessionError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|err| SessionError::Configuration(format!("invalid {key}={raw:?}: {err}"))),
    }
}
