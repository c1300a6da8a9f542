//! Backend record of live refresh tokens.
//!
//! A refresh token may mint access tokens only while its exact string is
//! registered here. Deleting the row is the one revocation mechanism.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::LedgerError;

/// A registered refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    pub id: String,
    pub token: String,
    pub user_id: String,
}

/// Revocation ledger operations consumed by the session core.
#[async_trait]
pub trait RevocationLedger: Send + Sync {
    async fn register_refresh_token(&self, token: &str, user_id: &str) -> Result<(), LedgerError>;

    /// Exact-match lookup. `Ok(None)` means revoked or never registered.
    async fn find_by_token_value(&self, token: &str) -> Result<Option<LedgerRecord>, LedgerError>;

    /// Remove the row for `token`. Deleting an absent row succeeds.
    async fn delete_by_token_value(&self, token: &str) -> Result<(), LedgerError>;
}

/// Ledger held in process memory, keyed by token value.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    records: Mutex<HashMap<String, LedgerRecord>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete every row owned by `user_id` ("sign out everywhere").
    /// Returns the number of rows removed.
    pub fn revoke_user(&self, user_id: &str) -> usize {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let before = records.len();
        records.retain(|_, record| record.user_id != user_id);
        before - records.len()
    }
}

#[async_trait]
impl RevocationLedger for InMemoryLedger {
    async fn register_refresh_token(&self, token: &str, user_id: &str) -> Result<(), LedgerError> {
        let record = LedgerRecord {
            id: uuid::Uuid::new_v4().to_string(),
            token: token.to_string(),
            user_id: user_id.to_string(),
        };
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.to_string(), record);
        Ok(())
    }

    async fn find_by_token_value(&self, token: &str) -> Result<Option<LedgerRecord>, LedgerError> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .cloned())
    }

    async fn delete_by_token_value(&self, token: &str) -> Result<(), LedgerError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token);
        Ok(())
    }
}
