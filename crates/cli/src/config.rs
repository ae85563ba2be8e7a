// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Layered configuration.
//!
//! Lowest to highest priority: compiled defaults, the global
//! `<config_dir>/config.toml`, the project's `Neptune.toml`, the project's
//! `.neptune/config.toml`, `NEPTUNE_*` environment variables, CLI flags.
//!
//! `NEPTUNE_*` variables may also come from `.env` files: the project's
//! (nearest `.env` at or above the working directory) wins over the global
//! `<config_dir>/.env`, and the process environment wins over both.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_API_URL: &str = "https://beta.neptune.dev/v1";

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
pub const DEFAULT_MAX_WAIT_SECS: u64 = 600;
pub const DEFAULT_LOGIN_TIMEOUT_SECS: u64 = 300;

pub const GLOBAL_CONFIG_FILE: &str = "config.toml";
pub const PROJECT_CONFIG_FILE: &str = "Neptune.toml";
pub const CREDENTIALS_FILE: &str = "credentials.json";
pub const DOTENV_FILE: &str = ".env";

/// Resolve the per-user configuration directory.
///
/// Checks `NEPTUNE_CONFIG_DIR`, then `$XDG_CONFIG_HOME/neptune`,
/// then `$HOME/.config/neptune`.
pub fn config_dir() -> PathBuf {
    config_dir_with(|name| std::env::var(name).ok())
}

/// Like [`config_dir`], with an injectable env lookup for tests.
pub fn config_dir_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
    let non_empty = |name: &str| env(name).filter(|v| !v.is_empty());
    if let Some(dir) = non_empty("NEPTUNE_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(xdg) = non_empty("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("neptune");
    }
    if let Some(home) = non_empty("HOME") {
        return PathBuf::from(home).join(".config/neptune");
    }
    PathBuf::from(".neptune")
}

/// One configuration layer. Every field is optional so layers can be merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigLayer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_wait_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_timeout_secs: Option<u64>,
}

impl ConfigLayer {
    /// Overlay `other` on top of `self`; values set in `other` win.
    pub fn merge(self, other: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            api_url: other.api_url.or(self.api_url),
            api_key: other.api_key.or(self.api_key),
            access_token: other.access_token.or(self.access_token),
            debug: other.debug.or(self.debug),
            poll_interval_secs: other.poll_interval_secs.or(self.poll_interval_secs),
            max_wait_secs: other.max_wait_secs.or(self.max_wait_secs),
            login_timeout_secs: other.login_timeout_secs.or(self.login_timeout_secs),
        }
    }

    /// Read a TOML layer. A missing file is an empty layer; an unreadable or
    /// invalid one is skipped with a warning.
    pub fn from_file(path: &Path) -> ConfigLayer {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return ConfigLayer::default(),
            Err(e) => {
                warn!(path = %path.display(), err = %e, "ignoring unreadable config file");
                return ConfigLayer::default();
            }
        };
        match toml::from_str(&contents) {
            Ok(layer) => layer,
            Err(e) => {
                warn!(path = %path.display(), err = %e, "ignoring invalid config file");
                ConfigLayer::default()
            }
        }
    }

    /// Read the `NEPTUNE_*` environment layer.
    pub fn from_env_with(env: impl Fn(&str) -> Option<String>) -> ConfigLayer {
        let get = |name: &str| env(name).filter(|v| !v.is_empty());
        let secs = |name: &str| get(name).and_then(|v| v.trim().parse().ok());
        ConfigLayer {
            api_url: get("NEPTUNE_API_URL").or_else(|| get("NEPTUNE_API")),
            api_key: get("NEPTUNE_API_KEY"),
            access_token: get("NEPTUNE_ACCESS_TOKEN"),
            debug: get("NEPTUNE_DEBUG").map(|v| parse_bool(&v)),
            poll_interval_secs: secs("NEPTUNE_POLL_INTERVAL_SECS"),
            max_wait_secs: secs("NEPTUNE_MAX_WAIT_SECS"),
            login_timeout_secs: secs("NEPTUNE_LOGIN_TIMEOUT_SECS"),
        }
    }
}

/// Variables collected from `.env` files. Never written to the process
/// environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DotEnv {
    vars: HashMap<String, String>,
}

impl DotEnv {
    /// The global `<config_dir>/.env`, overlaid by the nearest project `.env`.
    pub fn load(config_dir: &Path, working_dir: &Path) -> DotEnv {
        let mut dotenv = DotEnv::from_file(&config_dir.join(DOTENV_FILE));
        let project = working_dir.ancestors().map(|d| d.join(DOTENV_FILE)).find(|p| p.is_file());
        if let Some(path) = project {
            dotenv.vars.extend(DotEnv::from_file(&path).vars);
        }
        dotenv
    }

    /// Read one `.env` file. Missing is empty; parsing stops with a warning
    /// at the first invalid line.
    pub fn from_file(path: &Path) -> DotEnv {
        let iter = match dotenvy::from_path_iter(path) {
            Ok(iter) => iter,
            Err(e) if e.not_found() => return DotEnv::default(),
            Err(e) => {
                warn!(path = %path.display(), err = %e, "ignoring unreadable .env file");
                return DotEnv::default();
            }
        };
        let mut vars = HashMap::new();
        for item in iter {
            match item {
                Ok((key, value)) => {
                    vars.insert(key, value);
                }
                Err(e) => {
                    warn!(path = %path.display(), err = %e, "stopped reading invalid .env file");
                    break;
                }
            }
        }
        DotEnv { vars }
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Fully resolved settings for one CLI invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_url: String,
    pub api_key: Option<String>,
    pub access_token: Option<String>,
    pub debug: bool,
    pub poll_interval: Duration,
    pub max_wait: Duration,
    pub login_timeout: Duration,
    pub config_dir: PathBuf,
}

impl Settings {
    /// Resolve settings for `working_dir` from every layer plus CLI overrides.
    pub fn load(working_dir: &Path, overrides: ConfigLayer) -> Settings {
        Self::load_with(working_dir, overrides, |name| std::env::var(name).ok())
    }

    pub fn load_with(
        working_dir: &Path,
        overrides: ConfigLayer,
        env: impl Fn(&str) -> Option<String>,
    ) -> Settings {
        let config_dir = config_dir_with(&env);
        let dotenv = DotEnv::load(&config_dir, working_dir);
        let env = |name: &str| env(name).filter(|v| !v.is_empty()).or_else(|| dotenv.get(name));
        let layer = ConfigLayer::default()
            .merge(ConfigLayer::from_file(&config_dir.join(GLOBAL_CONFIG_FILE)))
            .merge(ConfigLayer::from_file(&working_dir.join(PROJECT_CONFIG_FILE)))
            .merge(ConfigLayer::from_file(&working_dir.join(".neptune").join(GLOBAL_CONFIG_FILE)))
            .merge(ConfigLayer::from_env_with(&env))
            .merge(overrides);

        let secs = |value: Option<u64>, default: u64| Duration::from_secs(value.unwrap_or(default));
        Settings {
            api_url: layer
                .api_url
                .map(|u| u.trim_end_matches('/').to_owned())
                .unwrap_or_else(|| DEFAULT_API_URL.to_owned()),
            api_key: layer.api_key,
            access_token: layer.access_token,
            debug: layer.debug.unwrap_or(false),
            poll_interval: secs(layer.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS),
            max_wait: secs(layer.max_wait_secs, DEFAULT_MAX_WAIT_SECS),
            login_timeout: secs(layer.login_timeout_secs, DEFAULT_LOGIN_TIMEOUT_SECS),
            config_dir,
        }
    }

    /// A configured credential that bypasses the token store: the API key,
    /// else an explicit access token override.
    pub fn static_token(&self) -> Option<String> {
        self.api_key.clone().or_else(|| self.access_token.clone())
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.config_dir.join(CREDENTIALS_FILE)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
