// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary tests.
//!
//! Runs the real `neptune` binary as a subprocess against a mock platform
//! API, with an isolated config directory and project directory.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use axum::Router;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use neptune::credential::store::TokenStore;
use neptune::credential::{epoch_secs, CredentialRecord, TokenKind};

/// Upper bound for any single CLI invocation in these tests.
pub const RUN_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolve the path to the compiled `neptune` binary.
pub fn neptune_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("neptune")
}

/// A mock platform API served on `127.0.0.1:0` until dropped.
pub struct MockApi {
    pub url: String,
    shutdown: CancellationToken,
}

impl MockApi {
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
}

impl Drop for MockApi {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Captured result of one CLI invocation.
#[derive(Debug)]
pub struct Output {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// An isolated `neptune` environment: its own config dir and project dir.
pub struct Neptune {
    config_dir: tempfile::TempDir,
    project_dir: tempfile::TempDir,
    api_url: Option<String>,
    api_key: Option<String>,
}

impl Neptune {
    pub fn new() -> anyhow::Result<Self> {
        let binary = neptune_binary();
        anyhow::ensure!(binary.exists(), "neptune binary not found at {}", binary.display());
        Ok(Self {
            config_dir: tempfile::tempdir()?,
            project_dir: tempfile::tempdir()?,
            api_url: None,
            api_key: None,
        })
    }

    pub fn api(mut self, url: &str) -> Self {
        self.api_url = Some(url.to_owned());
        self
    }

    pub fn api_key(mut self, key: &str) -> Self {
        self.api_key = Some(key.to_owned());
        self
    }

    /// Write `neptune.json` into the project directory.
    pub fn project(self, neptune_json: &str) -> anyhow::Result<Self> {
        std::fs::write(self.project_dir.path().join("neptune.json"), neptune_json)?;
        Ok(self)
    }

    pub fn project_path(&self) -> &Path {
        self.project_dir.path()
    }

    pub fn store(&self) -> TokenStore {
        TokenStore::new(self.config_dir.path().join("credentials.json"))
    }

    /// Store a session credential that expires `ttl_secs` from now
    /// (negative for one that has already expired).
    pub fn logged_in(self, token: &str, ttl_secs: i64) -> anyhow::Result<Self> {
        let now = epoch_secs();
        let expires_at = now.saturating_add_signed(ttl_secs);
        self.store().save(&CredentialRecord {
            access_token: token.to_owned(),
            issued_at: now.saturating_sub(60),
            expires_at,
            token_kind: TokenKind::Session,
        })?;
        Ok(self)
    }

    pub async fn run(&self, args: &[&str]) -> anyhow::Result<Output> {
        self.run_with_stdin(args, "").await
    }

    pub async fn run_with_stdin(&self, args: &[&str], stdin: &str) -> anyhow::Result<Output> {
        let mut cmd = tokio::process::Command::new(neptune_binary());
        cmd.args(args)
            .current_dir(self.project_dir.path())
            .env("NEPTUNE_CONFIG_DIR", self.config_dir.path())
            .env("NO_PROXY", "127.0.0.1,localhost")
            .env_remove("NEPTUNE_API_URL")
            .env_remove("NEPTUNE_API")
            .env_remove("NEPTUNE_API_KEY")
            .env_remove("NEPTUNE_ACCESS_TOKEN")
            .env_remove("NEPTUNE_LOG_LEVEL")
            .env_remove("RUST_LOG")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref url) = self.api_url {
            cmd.env("NEPTUNE_API_URL", url);
        }
        if let Some(ref key) = self.api_key {
            cmd.env("NEPTUNE_API_KEY", key);
        }

        let mut child = cmd.spawn()?;
        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(stdin.as_bytes()).await?;
        }
        let out = tokio::time::timeout(RUN_TIMEOUT, child.wait_with_output()).await??;
        Ok(Output {
            code: out.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        })
    }
}
