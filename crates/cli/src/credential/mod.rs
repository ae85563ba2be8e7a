// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credentials: browser login over a loopback redirect, file-backed token
//! storage, and the expiry guard in front of every authenticated call.
//!
//! No refresh grant is used. An expired session requires `neptune login`.

pub mod callback;
pub mod flow;
pub mod guard;
pub mod oauth;
pub mod store;

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// What a bearer token grants access to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Primary login session for the platform API.
    #[default]
    Session,
    /// Short-lived token scoped to one resource (e.g. a database connection).
    Resource,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session => f.write_str("session"),
            Self::Resource => f.write_str("resource"),
        }
    }
}

/// A stored bearer credential. Replaced as a whole, never patched.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub access_token: String,
    /// Issue time as epoch seconds.
    pub issued_at: u64,
    /// Expiry as epoch seconds.
    pub expires_at: u64,
    #[serde(default)]
    pub token_kind: TokenKind,
}

impl CredentialRecord {
    /// Usable only while `now < expires_at`.
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires_at <= now
    }

    /// Remaining lifetime, or `None` once expired.
    pub fn remaining_at(&self, now: u64) -> Option<Duration> {
        self.expires_at.checked_sub(now).filter(|s| *s > 0).map(Duration::from_secs)
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("access_token", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("token_kind", &self.token_kind)
            .finish()
    }
}

/// Current time as epoch seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Current time as epoch milliseconds.
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Render a lifetime as `1h 02m` / `4m 05s`.
pub fn format_remaining(d: Duration) -> String {
    let s = d.as_secs();
    if s >= 3600 {
        format!("{}h {:02}m", s / 3600, (s % 3600) / 60)
    } else {
        format!("{}m {:02}s", s / 60, s % 60)
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
