// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `neptune login`, `logout`, `whoami`.

use std::time::Duration;

use anyhow::Context as _;
use tracing::warn;

use super::Context;
use crate::credential::flow::{AuthFlow, Browser, NoBrowser, SystemBrowser};
use crate::credential::guard::AuthStatus;
use crate::credential::{epoch_secs, format_remaining, CredentialRecord};
use crate::error::{AuthError, ExitCode};

/// CLI arguments for `neptune login`.
#[derive(Debug, clap::Args)]
pub struct LoginArgs {
    /// Seconds to wait for the browser callback.
    #[arg(long)]
    pub timeout: Option<u64>,
    /// Print the login URL instead of opening a browser.
    #[arg(long)]
    pub no_browser: bool,
}

pub async fn login(ctx: &Context, args: &LoginArgs) -> anyhow::Result<ExitCode> {
    if ctx.settings.static_token().is_some() {
        warn!("an API key is configured; it takes precedence over the login session");
    }
    let timeout = args.timeout.map(Duration::from_secs).unwrap_or(ctx.settings.login_timeout);
    let record = if args.no_browser {
        authenticate(ctx, NoBrowser, timeout).await?
    } else {
        authenticate(ctx, SystemBrowser, timeout).await?
    };

    let remaining = record
        .remaining_at(epoch_secs())
        .map(format_remaining)
        .unwrap_or_else(|| "0m 00s".to_owned());
    println!("Logged in. Session valid for {remaining}.");
    Ok(ExitCode::Success)
}

async fn authenticate<B: Browser>(
    ctx: &Context,
    browser: B,
    timeout: Duration,
) -> anyhow::Result<CredentialRecord> {
    AuthFlow::new(&ctx.settings.api_url, ctx.api(), browser, ctx.store())
        .with_timeout(timeout)
        .authenticate()
        .await
}

pub fn logout(ctx: &Context) -> anyhow::Result<ExitCode> {
    let store = ctx.store();
    store.clear().with_context(|| format!("removing {}", store.path().display()))?;
    println!("Logged out.");
    Ok(ExitCode::Success)
}

pub fn whoami(ctx: &Context) -> anyhow::Result<ExitCode> {
    let now = epoch_secs();
    match ctx.guard().status_at(now) {
        AuthStatus::Static => println!("Authenticated with a configured API key."),
        AuthStatus::Active(record) => {
            let remaining = record.remaining_at(now).map(format_remaining).unwrap_or_default();
            println!("Logged in ({} token, expires in {remaining}).", record.token_kind);
        }
        AuthStatus::Expired(record) => {
            return Err(AuthError::Expired { expires_at: record.expires_at }.into())
        }
        AuthStatus::LoggedOut => return Err(AuthError::NotAuthenticated.into()),
    }
    Ok(ExitCode::Success)
}
