// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Expiry check in front of every authenticated call.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::credential::store::TokenStore;
use crate::credential::{epoch_secs, CredentialRecord};
use crate::error::AuthError;

/// Margin subtracted from a token's lifetime so a request cannot leave with a
/// token that expires in flight.
pub const DEFAULT_SKEW: Duration = Duration::from_secs(5);

/// Fail with [`AuthError::Expired`] unless `record` outlives `now + skew`.
pub fn ensure_usable(record: &CredentialRecord, now: u64, skew: Duration) -> Result<(), AuthError> {
    if record.is_expired_at(now.saturating_add(skew.as_secs())) {
        return Err(AuthError::Expired { expires_at: record.expires_at });
    }
    Ok(())
}

/// What `whoami` reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStatus {
    /// A configured API key or access token override is in use.
    Static,
    Active(CredentialRecord),
    Expired(CredentialRecord),
    LoggedOut,
}

/// Supplies the bearer token for authenticated calls, or refuses to.
#[derive(Debug, Clone)]
pub struct TokenGuard {
    store: TokenStore,
    static_token: Option<String>,
    skew: Duration,
}

impl TokenGuard {
    pub fn new(store: TokenStore, static_token: Option<String>) -> Self {
        Self { store, static_token: static_token.filter(|t| !t.is_empty()), skew: DEFAULT_SKEW }
    }

    pub fn with_skew(mut self, skew: Duration) -> Self {
        self.skew = skew;
        self
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Check a scoped resource token with this guard's skew.
    pub fn ensure_usable(&self, record: &CredentialRecord, now: u64) -> Result<(), AuthError> {
        ensure_usable(record, now, self.skew)
    }

    pub fn current_token_at(&self, now: u64) -> Result<String, AuthError> {
        if let Some(ref token) = self.static_token {
            return Ok(token.clone());
        }
        let record = self.store.load().ok_or(AuthError::NotAuthenticated)?;
        ensure_usable(&record, now, self.skew)?;
        Ok(record.access_token)
    }

    pub fn current_token(&self) -> Result<String, AuthError> {
        self.current_token_at(epoch_secs())
    }

    /// Run `call` with a usable bearer token. `call` is never invoked when
    /// the credential is absent or expired.
    pub async fn with_auth<T, F, Fut>(&self, call: F) -> anyhow::Result<T>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let token = match self.current_token() {
            Ok(t) => t,
            Err(e) => {
                debug!(code = e.as_str(), "refusing authenticated call");
                return Err(e.into());
            }
        };
        call(token).await
    }

    pub fn status_at(&self, now: u64) -> AuthStatus {
        if self.static_token.is_some() {
            return AuthStatus::Static;
        }
        match self.store.load() {
            None => AuthStatus::LoggedOut,
            Some(record) if ensure_usable(&record, now, self.skew).is_err() => {
                AuthStatus::Expired(record)
            }
            Some(record) => AuthStatus::Active(record),
        }
    }
}

#[cfg(test)]
#[path = "guard_tests.rs"]
mod tests;
