// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authorization code + PKCE (RFC 7636) helpers for the platform login.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::credential::guard::DEFAULT_SKEW;
use crate::credential::{CredentialRecord, TokenKind};
use crate::error::AuthError;

/// Generate a single-use state parameter (32 random bytes, base64url).
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a PKCE code verifier (43-128 char URL-safe random string).
pub fn generate_code_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compute code_challenge = base64url_nopad(sha256(verifier)).
pub fn compute_code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Build the browser login URL for `{api_url}/auth/login`.
pub fn build_auth_url(
    login_url: &str,
    redirect_uri: &str,
    state: &str,
    code_challenge: &str,
) -> String {
    format!(
        "{login_url}?response_type=code\
         &redirect_uri={redirect_uri}\
         &state={state}\
         &code_challenge={code_challenge}\
         &code_challenge_method=S256",
        redirect_uri = urlencoding(redirect_uri),
        state = urlencoding(state),
        code_challenge = urlencoding(code_challenge),
    )
}

/// Body of the code-for-token exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: String,
    pub redirect_uri: String,
    pub code_verifier: String,
}

impl TokenRequest {
    pub fn authorization_code(code: &str, redirect_uri: &str, code_verifier: &str) -> Self {
        Self {
            grant_type: "authorization_code".to_owned(),
            code: code.to_owned(),
            redirect_uri: redirect_uri.to_owned(),
            code_verifier: code_verifier.to_owned(),
        }
    }
}

/// Token endpoint response. Expiry may come as an absolute `expires_at`
/// (epoch seconds) or a relative `expires_in`.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_kind: Option<TokenKind>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("expires_in", &self.expires_in)
            .field("token_kind", &self.token_kind)
            .finish()
    }
}

impl TokenResponse {
    /// Convert into a record issued at `now`. A response without any expiry
    /// cannot be guarded and is rejected, as is one that would already fail
    /// the guard's skew check.
    pub fn into_record(self, now: u64) -> Result<CredentialRecord, AuthError> {
        if self.access_token.is_empty() {
            return Err(AuthError::ExchangeFailed("token response has no access_token".into()));
        }
        let expires_at = match (self.expires_at, self.expires_in) {
            (Some(at), _) => at,
            (None, Some(secs)) => now.saturating_add(secs),
            (None, None) => {
                return Err(AuthError::ExchangeFailed("token response has no expiry".into()))
            }
        };
        if expires_at <= now.saturating_add(DEFAULT_SKEW.as_secs()) {
            return Err(AuthError::ExchangeFailed("token already expired".into()));
        }
        Ok(CredentialRecord {
            access_token: self.access_token,
            issued_at: now,
            expires_at,
            token_kind: self.token_kind.unwrap_or_default(),
        })
    }
}

/// Percent-encoding for URL query parameters (RFC 3986 unreserved kept).
pub fn urlencoding(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            _ => {
                out.push('%');
                out.push(char::from(HEX[(b >> 4) as usize]));
                out.push(char::from(HEX[(b & 0xf) as usize]));
            }
        }
    }
    out
}

const HEX: &[u8; 16] = b"0123456789ABCDEF";

#[cfg(test)]
#[path = "oauth_tests.rs"]
mod tests;
