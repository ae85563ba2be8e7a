// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Interactive browser login: loopback listener, authorization URL, one code
//! exchange, and persistence of the resulting credential.

use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::credential::callback::{CallbackServer, CALLBACK_PATH};
use crate::credential::oauth::{
    build_auth_url, compute_code_challenge, generate_code_verifier, generate_state, TokenResponse,
};
use crate::credential::store::TokenStore;
use crate::credential::{epoch_secs, CredentialRecord};
use crate::error::AuthError;

/// Trades an authorization code for a token.
pub trait CodeExchange: Send + Sync {
    fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> impl Future<Output = anyhow::Result<TokenResponse>> + Send;
}

/// Opens the authorization URL for the user.
pub trait Browser: Send + Sync {
    fn open(&self, url: &str) -> anyhow::Result<()>;
}

/// The platform's default browser.
pub struct SystemBrowser;

impl Browser for SystemBrowser {
    fn open(&self, url: &str) -> anyhow::Result<()> {
        open::that(url).with_context(|| "launching browser")
    }
}

/// Print-only: the user opens the URL by hand (`--no-browser`, SSH sessions).
pub struct NoBrowser;

impl Browser for NoBrowser {
    fn open(&self, _url: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// One login attempt. Lives only in memory and only until the callback is
/// consumed or the attempt fails.
#[derive(Clone)]
pub struct PendingAuthRequest {
    pub state: String,
    pub code_verifier: String,
    pub redirect_port: u16,
    pub redirect_uri: String,
    pub created_at: u64,
    /// The callback must arrive before this instant.
    pub deadline: Instant,
}

impl PendingAuthRequest {
    pub fn new(state: String, redirect_port: u16, timeout: Duration) -> Self {
        Self {
            state,
            code_verifier: generate_code_verifier(),
            redirect_port,
            redirect_uri: format!("http://localhost:{redirect_port}{CALLBACK_PATH}"),
            created_at: epoch_secs(),
            deadline: Instant::now() + timeout,
        }
    }

    pub fn code_challenge(&self) -> String {
        compute_code_challenge(&self.code_verifier)
    }

    /// Time left before the deadline; zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

impl std::fmt::Debug for PendingAuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAuthRequest")
            .field("redirect_port", &self.redirect_port)
            .field("redirect_uri", &self.redirect_uri)
            .field("created_at", &self.created_at)
            .field("remaining", &self.remaining())
            .finish_non_exhaustive()
    }
}

/// Browser login against `{api_url}/auth/login`.
pub struct AuthFlow<E, B> {
    api_url: String,
    exchange: E,
    browser: B,
    store: TokenStore,
    timeout: Duration,
}

impl<E: CodeExchange, B: Browser> AuthFlow<E, B> {
    pub fn new(api_url: impl Into<String>, exchange: E, browser: B, store: TokenStore) -> Self {
        Self {
            api_url: api_url.into(),
            exchange,
            browser,
            store,
            timeout: Duration::from_secs(crate::config::DEFAULT_LOGIN_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn login_url(&self) -> String {
        format!("{}/auth/login", self.api_url.trim_end_matches('/'))
    }

    /// Run one login attempt to completion.
    ///
    /// Exactly one token exchange happens, and only for a callback whose
    /// `state` matches this attempt. On any failure the store is untouched.
    pub async fn authenticate(&self) -> anyhow::Result<CredentialRecord> {
        let state = generate_state();
        let server = CallbackServer::bind(state.clone()).await?;
        let pending = PendingAuthRequest::new(state, server.port(), self.timeout);
        debug_assert_eq!(pending.redirect_uri, server.redirect_uri());

        let url = build_auth_url(
            &self.login_url(),
            &pending.redirect_uri,
            &pending.state,
            &pending.code_challenge(),
        );
        eprintln!("Log in to Neptune in your browser. If it does not open, visit:\n\n  {url}\n");
        if let Err(e) = self.browser.open(&url) {
            warn!(err = %e, "could not open browser");
        }
        debug!(?pending, "waiting for login callback");

        let params = server.wait(pending.remaining()).await?;
        let response = self
            .exchange
            .exchange_code(&params.code, &pending.redirect_uri, &pending.code_verifier)
            .await
            .map_err(|e| AuthError::ExchangeFailed(format!("{e:#}")))?;
        let record = response.into_record(epoch_secs())?;

        self.store
            .save(&record)
            .with_context(|| format!("saving credential to {}", self.store.path().display()))?;
        info!(kind = %record.token_kind, expires_at = record.expires_at, "logged in");
        Ok(record)
    }
}

#[cfg(test)]
#[path = "flow_tests.rs"]
mod tests;
