// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;
use std::time::Duration;

use crate::monitor::DeploymentObservation;

/// Failures of the login flow and of the credential check that guards
/// every authenticated call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No valid callback arrived before the deadline.
    Timeout { waited: Duration, rejected: u32 },
    /// A callback carried a `state` that does not match the pending request.
    StateMismatch,
    /// The token endpoint rejected the code, or the authorization was denied.
    ExchangeFailed(String),
    /// No credential is stored and no API key is configured.
    NotAuthenticated,
    /// The stored credential has expired (or expires within the clock skew).
    Expired { expires_at: u64 },
}

impl AuthError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "AUTH_TIMEOUT",
            Self::StateMismatch => "STATE_MISMATCH",
            Self::ExchangeFailed(_) => "EXCHANGE_FAILED",
            Self::NotAuthenticated => "NOT_AUTHENTICATED",
            Self::Expired { .. } => "EXPIRED",
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { waited, rejected: 0 } => {
                write!(f, "no login callback received within {}", secs(*waited))
            }
            Self::Timeout { waited, rejected } => write!(
                f,
                "no valid login callback received within {} ({rejected} rejected)",
                secs(*waited)
            ),
            Self::StateMismatch => f.write_str("callback state does not match the login request"),
            Self::ExchangeFailed(msg) => write!(f, "token exchange failed: {msg}"),
            Self::NotAuthenticated => f.write_str("not logged in; run `neptune login`"),
            Self::Expired { expires_at } => write!(
                f,
                "credential expired at {expires_at} (unix time); run `neptune login` again"
            ),
        }
    }
}

impl std::error::Error for AuthError {}

/// Failures of the deployment monitor. Both carry enough context for the
/// caller to choose between checking logs and retrying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorError {
    /// Consecutive status polls failed `failures` times in a row.
    Unreachable {
        deployment_id: String,
        failures: u32,
        elapsed: Duration,
        last: Option<DeploymentObservation>,
        error: String,
    },
    /// `max_wait` elapsed without a terminal status. Inconclusive, not a failure.
    Timeout { deployment_id: String, elapsed: Duration, last: Option<DeploymentObservation> },
}

impl MonitorError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unreachable { .. } => "UNREACHABLE",
            Self::Timeout { .. } => "MONITOR_TIMEOUT",
        }
    }

    pub fn deployment_id(&self) -> &str {
        match self {
            Self::Unreachable { deployment_id, .. } | Self::Timeout { deployment_id, .. } => {
                deployment_id
            }
        }
    }

    pub fn last(&self) -> Option<&DeploymentObservation> {
        match self {
            Self::Unreachable { last, .. } | Self::Timeout { last, .. } => last.as_ref(),
        }
    }
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable { deployment_id, failures, elapsed, last, error } => {
                write!(
                    f,
                    "deployment {deployment_id}: status endpoint unreachable after {failures} \
                     consecutive failures ({} elapsed, last status: {}): {error}",
                    secs(*elapsed),
                    describe_last(last.as_ref()),
                )
            }
            Self::Timeout { deployment_id, elapsed, last } => write!(
                f,
                "deployment {deployment_id}: no terminal status after {} (last status: {}); \
                 result is inconclusive",
                secs(*elapsed),
                describe_last(last.as_ref()),
            ),
        }
    }
}

impl std::error::Error for MonitorError {}

fn describe_last(last: Option<&DeploymentObservation>) -> String {
    match last {
        Some(obs) => format!("{} at poll {}", obs.status, obs.attempt),
        None => "none".to_owned(),
    }
}

fn secs(d: Duration) -> String {
    format!("{:.1}s", d.as_secs_f64())
}

/// Process exit codes for the `neptune` binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    Failure,
    Usage,
    Unauthenticated,
    Inconclusive,
}

impl ExitCode {
    pub fn code(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Usage => 2,
            Self::Unauthenticated => 3,
            Self::Inconclusive => 4,
        }
    }

    /// Classify an error chain by the first domain error it contains.
    pub fn for_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(auth) = cause.downcast_ref::<AuthError>() {
                return match auth {
                    AuthError::NotAuthenticated | AuthError::Expired { .. } => {
                        Self::Unauthenticated
                    }
                    _ => Self::Failure,
                };
            }
            if let Some(MonitorError::Timeout { .. }) = cause.downcast_ref::<MonitorError>() {
                return Self::Inconclusive;
            }
        }
        Self::Failure
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
