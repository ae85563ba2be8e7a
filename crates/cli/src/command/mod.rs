// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI surface: argument parsing, tracing setup, and subcommand dispatch.

pub mod auth;
pub mod bucket;
pub mod project;
pub mod upgrade;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

use crate::api::ApiClient;
use crate::config::{ConfigLayer, Settings};
use crate::credential::guard::TokenGuard;
use crate::credential::store::TokenStore;
use crate::deploy::Progress;
use crate::error::ExitCode;

/// Deploy and operate projects on the Neptune platform.
#[derive(Debug, Parser)]
#[command(name = "neptune", version, about)]
pub struct Cli {
    /// Platform API base URL.
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// API key; bypasses the stored login session.
    #[arg(long, global = true)]
    pub api_key: Option<String>,

    /// Project directory (defaults to the current directory).
    #[arg(long, short = 'C', global = true)]
    pub dir: Option<PathBuf>,

    /// Log level or filter directive (trace, debug, info, warn, error).
    #[arg(long, global = true, env = "NEPTUNE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log format (json or text).
    #[arg(long, global = true, env = "NEPTUNE_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in through the browser.
    Login(auth::LoginArgs),
    /// Remove the stored login session.
    Logout,
    /// Show the current credential without revealing it.
    Whoami,
    /// Create or update the project from neptune.json and wait until ready.
    Provision,
    /// Provision, build and push the image, deploy, and wait for the result.
    Deploy(project::WaitArgs),
    /// Show project state, and the status of one deployment if given.
    Status {
        deployment: Option<String>,
    },
    /// Wait for a deployment to reach a terminal status.
    Wait {
        deployment: String,
        #[command(flatten)]
        wait: project::WaitArgs,
    },
    /// Print the logs of a deployment.
    Logs {
        deployment: String,
    },
    /// Show connection details for a project database.
    DbInfo {
        database: String,
    },
    /// Set a project secret; the value is read from stdin.
    Secret {
        name: String,
    },
    /// List projects.
    Projects,
    /// Read the project's storage buckets.
    Bucket(bucket::BucketArgs),
    /// Delete a project (defaults to the one in neptune.json).
    Delete {
        name: Option<String>,
        /// Confirm deletion.
        #[arg(long)]
        yes: bool,
    },
    /// Upgrade neptune to the latest release.
    Upgrade(upgrade::UpgradeArgs),
    /// Serve the workflows above as MCP tools on stdin/stdout.
    Mcp,
}

/// Resolved state shared by every subcommand.
#[derive(Clone)]
pub struct Context {
    pub settings: Settings,
    pub working_dir: PathBuf,
}

impl Context {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let working_dir = match cli.dir {
            Some(ref d) => d.clone(),
            None => std::env::current_dir()?,
        };
        let overrides = ConfigLayer {
            api_url: cli.api_url.clone(),
            api_key: cli.api_key.clone(),
            ..ConfigLayer::default()
        };
        let settings = Settings::load(&working_dir, overrides);
        Ok(Self { settings, working_dir })
    }

    pub fn store(&self) -> TokenStore {
        TokenStore::new(self.settings.credentials_path())
    }

    pub fn guard(&self) -> TokenGuard {
        TokenGuard::new(self.store(), self.settings.static_token())
    }

    pub fn api(&self) -> ApiClient {
        ApiClient::new(&self.settings.api_url, self.guard())
    }

    /// Progress lines go to stdout alongside the command's result.
    pub fn progress(&self) -> Progress {
        std::sync::Arc::new(|line: &str| println!("{line}"))
    }
}

/// Install the global subscriber. Logs go to stderr.
///
/// Returns a handle for raising the level later when no level was given
/// explicitly (the config file's `debug` flag is only known after loading).
pub fn init_tracing(cli: &Cli) -> Option<reload::Handle<EnvFilter, Registry>> {
    let explicit = cli.log_level.clone().or_else(|| std::env::var("RUST_LOG").ok());
    let filter = explicit
        .as_deref()
        .and_then(|l| EnvFilter::try_new(l).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    let (filter, handle) = reload::Layer::new(filter);
    let registry = tracing_subscriber::registry().with(filter);

    let _ = match cli.log_format.as_str() {
        "json" => registry.with(fmt::layer().json().with_writer(std::io::stderr)).try_init(),
        _ => registry.with(fmt::layer().with_writer(std::io::stderr)).try_init(),
    };
    explicit.is_none().then_some(handle)
}

/// Run one subcommand. Returns a process exit code.
pub async fn run(cli: Cli, log_handle: Option<reload::Handle<EnvFilter, Registry>>) -> i32 {
    let ctx = match Context::load(&cli) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::Usage.code();
        }
    };
    if ctx.settings.debug {
        if let Some(handle) = log_handle {
            let _ = handle.modify(|f| *f = EnvFilter::new("debug"));
        }
    }

    let result = match cli.command {
        Command::Login(ref args) => auth::login(&ctx, args).await,
        Command::Logout => auth::logout(&ctx),
        Command::Whoami => auth::whoami(&ctx),
        Command::Provision => project::provision(&ctx).await,
        Command::Deploy(ref args) => project::deploy(&ctx, args).await,
        Command::Status { ref deployment } => project::status(&ctx, deployment.as_deref()).await,
        Command::Wait { ref deployment, ref wait } => project::wait(&ctx, deployment, wait).await,
        Command::Logs { ref deployment } => project::logs(&ctx, deployment).await,
        Command::DbInfo { ref database } => project::db_info(&ctx, database).await,
        Command::Secret { ref name } => project::secret(&ctx, name).await,
        Command::Projects => project::projects(&ctx).await,
        Command::Delete { ref name, yes } => project::delete(&ctx, name.as_deref(), yes).await,
        Command::Bucket(ref args) => bucket::run(&ctx, args).await,
        Command::Upgrade(ref args) => upgrade::run(args).await,
        Command::Mcp => crate::mcp::serve_stdio(ctx.clone()).await.map(|()| ExitCode::Success),
    };

    match result {
        Ok(code) => code.code(),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::for_error(&e).code()
        }
    }
}

/// Left-aligned columns sized to their widest cell.
pub fn format_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let mut out = pad_row(headers.iter().copied(), &widths);
    out.push('\n');
    out.push_str(&"-".repeat(widths.iter().sum::<usize>() + 2 * widths.len().saturating_sub(1)));
    for row in rows {
        out.push('\n');
        out.push_str(&pad_row(row.iter().map(String::as_str), &widths));
    }
    out
}

fn pad_row<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    let padded: Vec<String> = cells.zip(widths).map(|(c, w)| format!("{c:<w$}", w = *w)).collect();
    padded.join("  ").trim_end().to_owned()
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
