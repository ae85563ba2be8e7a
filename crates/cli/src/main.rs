// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use neptune::command::{init_tracing, run, Cli};

/// Conventional exit status for a process stopped by SIGINT.
const INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let log_handle = init_tracing(&cli);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        });
    }

    let code = tokio::select! {
        code = run(cli, log_handle) => code,
        _ = shutdown.cancelled() => {
            debug!("interrupted");
            eprintln!("\ninterrupted");
            INTERRUPTED
        }
    };
    std::process::exit(code);
}
