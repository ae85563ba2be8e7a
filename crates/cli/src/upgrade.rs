// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Self-upgrade from the latest GitHub release.

use std::cmp::Ordering;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::backoff::retry_fixed;

pub const RELEASE_REPO: &str = "shuttle-hq/neptune-cli-python";

pub const DOWNLOAD_ATTEMPTS: u32 = 5;
pub const DOWNLOAD_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Version of the running binary.
pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Numeric dotted comparison. Non-numeric suffixes within a component are
/// ignored (`1.2.3-rc1` compares as `1.2.3`); missing components count as 0.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |s: &str| -> Vec<u64> {
        s.trim()
            .trim_start_matches('v')
            .split('.')
            .map(|part| {
                let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
                digits.parse().unwrap_or(0)
            })
            .collect()
    };
    let (a, b) = (parse(a), parse(b));
    let len = a.len().max(b.len());
    for i in 0..len {
        let (x, y) = (a.get(i).copied().unwrap_or(0), b.get(i).copied().unwrap_or(0));
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Release asset for `os`/`arch` as reported by `std::env::consts`.
pub fn platform_asset_name(os: &str, arch: &str) -> Option<String> {
    let arch = match arch {
        "x86_64" | "amd64" => "amd64",
        "aarch64" | "arm64" => "arm64",
        _ => return None,
    };
    match os {
        "linux" => Some(format!("neptune-linux-{arch}")),
        "macos" => Some(format!("neptune-macos-{arch}")),
        "windows" => Some(format!("neptune-windows-{arch}.exe")),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateInfo {
    pub current_version: String,
    pub latest_version: String,
    pub asset_name: String,
    pub download_url: String,
}

impl UpdateInfo {
    pub fn update_available(&self) -> bool {
        compare_versions(&self.latest_version, &self.current_version) == Ordering::Greater
    }
}

/// Release lookup and download.
pub struct Upgrader {
    client: reqwest::Client,
    api_base: String,
    download_base: String,
    retry_interval: Duration,
}

impl Default for Upgrader {
    fn default() -> Self {
        crate::ensure_crypto();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("neptune/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_base: "https://api.github.com".to_owned(),
            download_base: format!("https://github.com/{RELEASE_REPO}/releases/latest/download"),
            retry_interval: DOWNLOAD_RETRY_INTERVAL,
        }
    }
}

impl Upgrader {
    /// Point at a different API and download host.
    pub fn with_endpoints(
        client: reqwest::Client,
        api_base: impl Into<String>,
        download_base: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into(),
            download_base: download_base.into(),
            retry_interval: DOWNLOAD_RETRY_INTERVAL,
        }
    }

    pub fn retry_interval(mut self, d: Duration) -> Self {
        self.retry_interval = d;
        self
    }

    pub async fn latest_version(&self) -> anyhow::Result<String> {
        let url = format!("{}/repos/{RELEASE_REPO}/releases/latest", self.api_base);
        let release: Release = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("parsing release metadata")?;
        Ok(release.tag_name.trim_start_matches('v').to_owned())
    }

    pub async fn check_for_update(&self) -> anyhow::Result<UpdateInfo> {
        let asset_name = platform_asset_name(std::env::consts::OS, std::env::consts::ARCH)
            .with_context(|| {
                format!(
                    "no release build for {}/{}",
                    std::env::consts::OS,
                    std::env::consts::ARCH
                )
            })?;
        let latest_version = self.latest_version().await?;
        Ok(UpdateInfo {
            current_version: CURRENT_VERSION.to_owned(),
            latest_version,
            download_url: format!("{}/{asset_name}", self.download_base),
            asset_name,
        })
    }

    /// Download `url` into a temp file in `dir`, retrying a failed attempt
    /// up to [`DOWNLOAD_ATTEMPTS`] times in total.
    pub async fn download(&self, url: &str, dir: &Path) -> anyhow::Result<NamedTempFile> {
        retry_fixed(DOWNLOAD_ATTEMPTS, self.retry_interval, |attempt| async move {
            debug!(url, attempt, "downloading release");
            let bytes = self.client.get(url).send().await?.error_for_status()?.bytes().await?;
            if bytes.is_empty() {
                bail!("empty download from {url}");
            }
            let mut tmp = tempfile::Builder::new().prefix(".neptune-upgrade.").tempfile_in(dir)?;
            tmp.write_all(&bytes)?;
            tmp.as_file().sync_all()?;
            Ok(tmp)
        })
        .await
    }

    /// Download the new release and atomically replace `exe`.
    pub async fn perform(&self, info: &UpdateInfo, exe: &Path) -> anyhow::Result<()> {
        if cfg!(windows) {
            bail!("in-place upgrade is not supported on Windows; download {}", info.download_url);
        }
        let dir = exe.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let tmp = self
            .download(&info.download_url, dir)
            .await
            .with_context(|| format!("downloading {}", info.download_url))?;
        replace_binary(tmp, exe)?;
        info!(version = %info.latest_version, path = %exe.display(), "upgraded");
        Ok(())
    }
}

/// Mark `new` executable and rename it over `target`.
pub fn replace_binary(new: NamedTempFile, target: &Path) -> anyhow::Result<()> {
    make_executable(new.path())?;
    new.persist(target).map_err(|e| {
        let hint = if e.error.kind() == std::io::ErrorKind::PermissionDenied {
            " (try: sudo neptune upgrade)"
        } else {
            ""
        };
        anyhow::Error::new(e.error).context(format!("replacing {}{hint}", target.display()))
    })?;
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
#[path = "upgrade_tests.rs"]
mod tests;
