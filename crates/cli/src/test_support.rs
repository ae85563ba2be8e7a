// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: mock servers, clients, and assertion helpers.

use std::net::Ipv4Addr;
use std::path::Path;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::api::ApiClient;
use crate::credential::guard::TokenGuard;
use crate::credential::store::TokenStore;

/// Plain HTTP client for talking to loopback test servers.
pub fn http_client() -> reqwest::Client {
    crate::ensure_crypto();
    reqwest::Client::builder().no_proxy().build().unwrap_or_default()
}

/// An axum router served on `127.0.0.1:0` until dropped.
pub struct MockServer {
    pub url: String,
    shutdown: CancellationToken,
}

impl MockServer {
    pub async fn start(router: Router) -> anyhow::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let url = format!("http://{}", listener.local_addr()?);
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).with_graceful_shutdown(token.cancelled_owned()).await;
        });
        Ok(Self { url, shutdown })
    }

    /// API client for this server authenticated with a static token.
    pub fn client(&self, dir: &Path) -> ApiClient {
        let guard = TokenGuard::new(TokenStore::new(dir.join("credentials.json")), Some("test-token".into()));
        ApiClient::with_http(&self.url, guard, http_client())
    }

    /// API client for this server with no credential at all.
    pub fn logged_out_client(&self, dir: &Path) -> ApiClient {
        let guard = TokenGuard::new(TokenStore::new(dir.join("credentials.json")), None);
        ApiClient::with_http(&self.url, guard, http_client())
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
