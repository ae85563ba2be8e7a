// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Loopback HTTP listener that receives the browser redirect after login.
//!
//! Bound to `127.0.0.1` on an ephemeral port, serves `GET /callback` only,
//! and completes at most once. Callbacks with a foreign `state` are answered
//! with an error page and counted, but never end the wait.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::AuthError;

/// Path the platform redirects the browser to.
pub const CALLBACK_PATH: &str = "/callback";

/// Query parameters carried by the redirect.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// An accepted callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: String,
    pub state: String,
}

/// Why a callback was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Missing `state` or `code`.
    Malformed(&'static str),
    /// `state` differs from the pending request.
    StateMismatch,
    /// The user (or the platform) refused the authorization. Only reported
    /// when `state` matches, so a foreign page cannot abort the login.
    Denied(String),
}

impl From<Rejection> for AuthError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::StateMismatch => AuthError::StateMismatch,
            Rejection::Denied(detail) => {
                AuthError::ExchangeFailed(format!("authorization denied: {detail}"))
            }
            Rejection::Malformed(reason) => {
                AuthError::ExchangeFailed(format!("malformed callback: {reason}"))
            }
        }
    }
}

/// Decide whether a callback completes the pending request.
pub fn validate_callback(
    expected_state: &str,
    query: &CallbackQuery,
) -> Result<CallbackParams, Rejection> {
    let state = match query.state.as_deref() {
        Some(s) if !s.is_empty() => s,
        _ => return Err(Rejection::Malformed("missing state")),
    };
    if !constant_time_eq(state.as_bytes(), expected_state.as_bytes()) {
        return Err(Rejection::StateMismatch);
    }
    if let Some(ref err) = query.error {
        let detail = match query.error_description.as_deref() {
            Some(d) if !d.is_empty() => format!("{err}: {d}"),
            _ => err.clone(),
        };
        return Err(Rejection::Denied(detail));
    }
    match query.code.as_deref() {
        Some(code) if !code.is_empty() => {
            Ok(CallbackParams { code: code.to_owned(), state: state.to_owned() })
        }
        _ => Err(Rejection::Malformed("missing code")),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

type Outcome = Result<CallbackParams, AuthError>;

struct Shared {
    expected_state: String,
    outcome: Mutex<Option<oneshot::Sender<Outcome>>>,
    rejected: AtomicU32,
    last_rejection: std::sync::Mutex<Option<AuthError>>,
}

impl Shared {
    /// Count a callback that did not complete the request. Returns the new count.
    fn reject(&self, err: &AuthError) -> u32 {
        if let Ok(mut last) = self.last_rejection.lock() {
            *last = Some(err.clone());
        }
        self.rejected.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// A bound, running callback listener.
pub struct CallbackServer {
    port: u16,
    shared: Arc<Shared>,
    rx: oneshot::Receiver<Outcome>,
    shutdown: CancellationToken,
}

impl CallbackServer {
    /// Bind `127.0.0.1:0` and start serving.
    pub async fn bind(expected_state: impl Into<String>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let port = listener.local_addr()?.port();

        let (tx, rx) = oneshot::channel();
        let shared = Arc::new(Shared {
            expected_state: expected_state.into(),
            outcome: Mutex::new(Some(tx)),
            rejected: AtomicU32::new(0),
            last_rejection: std::sync::Mutex::new(None),
        });

        let router = Router::new()
            .route(CALLBACK_PATH, get(handle_callback))
            .fallback(|| async { (StatusCode::NOT_FOUND, "not found") })
            .with_state(Arc::clone(&shared));

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) =
                axum::serve(listener, router).with_graceful_shutdown(token.cancelled_owned()).await
            {
                warn!(err = %e, "callback listener stopped");
            }
        });
        debug!(port, "callback listener bound");

        Ok(Self { port, shared, rx, shutdown })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The `redirect_uri` to register with the authorization request.
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}{CALLBACK_PATH}", self.port)
    }

    /// Callbacks rejected so far.
    pub fn rejected(&self) -> u32 {
        self.shared.rejected.load(Ordering::Relaxed)
    }

    /// Why the most recent non-completing callback was refused.
    pub fn last_rejection(&self) -> Option<AuthError> {
        self.shared.last_rejection.lock().ok().and_then(|last| last.clone())
    }

    /// Wait for the first accepted callback. The listener is shut down when
    /// this returns, whatever the outcome.
    pub async fn wait(mut self, timeout: Duration) -> Result<CallbackParams, AuthError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(Ok(params))) => Ok(params),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(AuthError::ExchangeFailed("callback listener stopped".into())),
            Err(_) => {
                if let Some(last) = self.last_rejection() {
                    debug!(code = last.as_str(), "login timed out after rejected callbacks");
                }
                Err(AuthError::Timeout { waited: timeout, rejected: self.rejected() })
            }
        }
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn handle_callback(
    State(shared): State<Arc<Shared>>,
    query: Result<Query<CallbackQuery>, QueryRejection>,
) -> Response {
    let query = match query {
        Ok(Query(q)) => q,
        Err(e) => {
            shared.reject(&AuthError::from(Rejection::Malformed("unparseable query")));
            debug!(err = %e, "unparseable callback query");
            return (StatusCode::BAD_REQUEST, Html(MALFORMED_HTML)).into_response();
        }
    };

    let mut slot = shared.outcome.lock().await;
    if slot.is_none() {
        return (StatusCode::CONFLICT, Html(COMPLETED_HTML)).into_response();
    }

    match validate_callback(&shared.expected_state, &query) {
        Ok(params) => {
            if let Some(tx) = slot.take() {
                let _ = tx.send(Ok(params));
            }
            (StatusCode::OK, Html(SUCCESS_HTML)).into_response()
        }
        Err(denied @ Rejection::Denied(_)) => {
            if let Some(tx) = slot.take() {
                let _ = tx.send(Err(denied.into()));
            }
            (StatusCode::OK, Html(DENIED_HTML)).into_response()
        }
        Err(Rejection::StateMismatch) => {
            let err = AuthError::StateMismatch;
            let n = shared.reject(&err);
            warn!(rejected = n, code = err.as_str(), "ignoring login callback: {err}");
            (StatusCode::BAD_REQUEST, Html(MISMATCH_HTML)).into_response()
        }
        Err(malformed @ Rejection::Malformed(_)) => {
            let err = AuthError::from(malformed);
            let n = shared.reject(&err);
            debug!(rejected = n, code = err.as_str(), "ignoring login callback: {err}");
            (StatusCode::BAD_REQUEST, Html(MALFORMED_HTML)).into_response()
        }
    }
}

const SUCCESS_HTML: &str = "<!doctype html><html><body>\
<h1>Logged in to Neptune</h1><p>You can close this tab and return to the terminal.</p>\
</body></html>";

const DENIED_HTML: &str = "<!doctype html><html><body>\
<h1>Login cancelled</h1><p>The authorization was not granted. Return to the terminal.</p>\
</body></html>";

const MISMATCH_HTML: &str = "<!doctype html><html><body>\
<h1>Login request not recognized</h1>\
<p>This callback does not belong to the running <code>neptune login</code>.</p>\
</body></html>";

const MALFORMED_HTML: &str = "<!doctype html><html><body>\
<h1>Invalid login callback</h1><p>The redirect is missing required parameters.</p>\
</body></html>";

const COMPLETED_HTML: &str = "<!doctype html><html><body>\
<h1>Already logged in</h1><p>This login has already completed.</p>\
</body></html>";

#[cfg(test)]
#[path = "callback_tests.rs"]
mod tests;
