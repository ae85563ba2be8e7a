// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Neptune: authenticate against the deployment platform and drive
//! provision / build / deploy / wait / logs workflows from the terminal.

pub mod api;
pub mod backoff;
pub mod command;
pub mod config;
pub mod credential;
pub mod deploy;
pub mod error;
pub mod mcp;
pub mod monitor;
pub mod upgrade;

#[cfg(test)]
pub mod test_support;

use std::sync::Once;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times; only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
