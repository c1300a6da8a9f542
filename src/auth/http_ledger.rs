//! REST client for the backend revocation ledger.
//!
//! The token table is private: every call authenticates with the very refresh
//! token it operates on, so a token can only read or delete itself.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;

use super::error::LedgerError;
use super::ledger::{LedgerRecord, RevocationLedger};
use crate::util::retry::RetryPolicy;

/// Ledger backed by `{base_url}/tokens`.
///
/// # Example
/// ```no_run
/// use ballot_session::auth::{HttpLedger, RevocationLedger};
///
/// # async fn example() -> Result<(), ballot_session::auth::LedgerError> {
/// let ledger = HttpLedger::new("https://api.example.com");
/// let record = ledger.find_by_token_value("refresh-token").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpLedger {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest<'a> {
    token: &'a str,
    user_id: &'a str,
}

impl HttpLedger {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn tokens_url(&self) -> String {
        format!("{}/tokens", self.base_url)
    }

    fn by_token_url(&self) -> String {
        format!("{}/tokens/by-token", self.base_url)
    }

    fn authorized(&self, request: RequestBuilder, token: &str) -> RequestBuilder {
        request
            .bearer_auth(token)
            .header("Accept", "application/json")
    }

    async fn register_once(&self, token: &str, user_id: &str) -> Result<(), LedgerError> {
        let resp = self
            .authorized(self.client.post(self.tokens_url()), token)
            .json(&RegisterRequest { token, user_id })
            .send()
            .await?;
        ensure_success(resp).await.map(|_| ())
    }

    async fn find_once(&self, token: &str) -> Result<Option<LedgerRecord>, LedgerError> {
        let resp = self
            .authorized(self.client.get(self.by_token_url()), token)
            .query(&[("token", token)])
            .send()
            .await?;
        match resp.status() {
            // An unknown token cannot authenticate itself, so the backend
            // answers 401/403 as readily as 404.
            StatusCode::NOT_FOUND | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(None),
            _ => {
                let resp = ensure_success(resp).await?;
                let record: Option<LedgerRecord> = resp.json().await?;
                match record {
                    Some(record) if record.token != token => Err(LedgerError::InvalidResponse(
                        "ledger returned a different token".to_string(),
                    )),
                    other => Ok(other),
                }
            }
        }
    }

    async fn delete_once(&self, token: &str) -> Result<(), LedgerError> {
        let resp = self
            .authorized(self.client.delete(self.by_token_url()), token)
            .query(&[("token", token)])
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success(resp).await.map(|_| ())
    }
}

#[async_trait]
impl RevocationLedger for HttpLedger {
    async fn register_refresh_token(&self, token: &str, user_id: &str) -> Result<(), LedgerError> {
        self.retry
            .execute(|| self.register_once(token, user_id))
            .await?;
        tracing::debug!(user_id, "registered refresh token");
        Ok(())
    }

    async fn find_by_token_value(&self, token: &str) -> Result<Option<LedgerRecord>, LedgerError> {
        self.retry.execute(|| self.find_once(token)).await
    }

    async fn delete_by_token_value(&self, token: &str) -> Result<(), LedgerError> {
        self.retry.execute(|| self.delete_once(token)).await
    }
}

async fn ensure_success(resp: Response) -> Result<Response, LedgerError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(LedgerError::Status {
        status: status.as_u16(),
        message,
    })
}
