// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deployment lifecycle monitor: poll a deployment until it reaches a
//! terminal status, the wait budget runs out, or the status endpoint stays
//! unreachable.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::credential::epoch_ms;
use crate::error::{AuthError, MonitorError};

/// Consecutive failed polls tolerated before giving up.
pub const DEFAULT_MAX_FAILURES: u32 = 3;

/// Upper bound for the delay between polls after failures.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Floor applied to the caller's poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Remote deployment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeploymentStatus {
    Pending,
    Provisioning,
    Starting,
    Running,
    Stopped,
    Error,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Provisioning => "Provisioning",
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::Error => "Error",
        }
    }

    /// Running, Stopped and Error end the wait.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Running | Self::Stopped | Self::Error)
    }

    /// Terminal statuses worth fetching logs for.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "provisioning" => Ok(Self::Provisioning),
            "starting" => Ok(Self::Starting),
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "error" => Ok(Self::Error),
            other => anyhow::bail!("unknown deployment status: {other:?}"),
        }
    }
}

/// One successful poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentObservation {
    pub status: DeploymentStatus,
    /// Epoch milliseconds.
    pub observed_at: u64,
    /// 1-based poll number within one monitoring session.
    pub attempt: u32,
}

/// Where the monitor reads status from.
pub trait StatusSource: Send + Sync {
    fn fetch_status(
        &self,
        deployment_id: &str,
    ) -> impl Future<Output = anyhow::Result<DeploymentStatus>> + Send;
}

impl<S: StatusSource> StatusSource for &S {
    fn fetch_status(
        &self,
        deployment_id: &str,
    ) -> impl Future<Output = anyhow::Result<DeploymentStatus>> + Send {
        (**self).fetch_status(deployment_id)
    }
}

type Observer = Box<dyn Fn(&DeploymentObservation) + Send + Sync>;

/// Bounded polling state machine over a [`StatusSource`].
pub struct DeploymentMonitor<S> {
    source: S,
    max_failures: u32,
    max_backoff: Duration,
    observer: Option<Observer>,
}

impl<S: StatusSource> DeploymentMonitor<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            max_failures: DEFAULT_MAX_FAILURES,
            max_backoff: DEFAULT_MAX_BACKOFF,
            observer: None,
        }
    }

    pub fn max_failures(mut self, n: u32) -> Self {
        self.max_failures = n.max(1);
        self
    }

    pub fn max_backoff(mut self, d: Duration) -> Self {
        self.max_backoff = d;
        self
    }

    /// Called with every successful observation, in poll order.
    pub fn on_observation(mut self, f: impl Fn(&DeploymentObservation) + Send + Sync + 'static) -> Self {
        self.observer = Some(Box::new(f));
        self
    }

    /// Poll `deployment_id` until a terminal status.
    ///
    /// Returns the terminal observation. Fails with [`MonitorError::Timeout`]
    /// once `max_wait` has elapsed, or [`MonitorError::Unreachable`] after
    /// `max_failures` consecutive failed polls. An [`AuthError`] from the
    /// source is returned as-is. `poll_interval` is raised to at least
    /// [`MIN_POLL_INTERVAL`].
    pub async fn wait_for(
        &self,
        deployment_id: &str,
        max_wait: Duration,
        poll_interval: Duration,
    ) -> anyhow::Result<DeploymentObservation> {
        let poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
        let start = Instant::now();
        let deadline = start + max_wait;
        let mut backoff = Backoff::new(poll_interval, self.max_backoff);
        let mut delay = poll_interval;
        let mut attempt: u32 = 0;
        let mut failures: u32 = 0;
        let mut last: Option<DeploymentObservation> = None;

        loop {
            let now = Instant::now();
            if now >= deadline {
                info!(deployment_id, polls = attempt, "wait budget exhausted");
                return Err(MonitorError::Timeout {
                    deployment_id: deployment_id.to_owned(),
                    elapsed: now - start,
                    last,
                }
                .into());
            }
            tokio::time::sleep(delay.min(deadline - now)).await;

            attempt += 1;
            let budget = deadline.saturating_duration_since(Instant::now()) + poll_interval;
            let error = match tokio::time::timeout(budget, self.source.fetch_status(deployment_id)).await {
                Ok(Ok(status)) => {
                    let obs = DeploymentObservation { status, observed_at: epoch_ms(), attempt };
                    debug!(deployment_id, attempt, %status, "deployment status");
                    if let Some(ref observer) = self.observer {
                        observer(&obs);
                    }
                    failures = 0;
                    backoff.reset();
                    delay = poll_interval;
                    if status.is_terminal() {
                        info!(deployment_id, attempt, %status, "deployment reached terminal status");
                        return Ok(obs);
                    }
                    last = Some(obs);
                    continue;
                }
                Ok(Err(e)) => {
                    if e.downcast_ref::<AuthError>().is_some() {
                        return Err(e);
                    }
                    format!("{e:#}")
                }
                Err(_) => format!("status request timed out after {}s", budget.as_secs()),
            };

            failures += 1;
            warn!(deployment_id, attempt, failures, err = %error, "status poll failed");
            if failures >= self.max_failures {
                return Err(MonitorError::Unreachable {
                    deployment_id: deployment_id.to_owned(),
                    failures,
                    elapsed: start.elapsed(),
                    last,
                    error,
                }
                .into());
            }
            delay = backoff.next_delay();
        }
    }
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
