// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `neptune upgrade`.

use anyhow::Context as _;

use crate::error::ExitCode;
use crate::upgrade::Upgrader;

/// CLI arguments for `neptune upgrade`.
#[derive(Debug, clap::Args)]
pub struct UpgradeArgs {
    /// Only report whether a newer release exists.
    #[arg(long)]
    pub check: bool,
}

pub async fn run(args: &UpgradeArgs) -> anyhow::Result<ExitCode> {
    let upgrader = Upgrader::default();
    let info = upgrader.check_for_update().await.context("checking for updates")?;

    if !info.update_available() {
        println!("neptune {} is up to date.", info.current_version);
        return Ok(ExitCode::Success);
    }
    println!("Update available: {} -> {}", info.current_version, info.latest_version);
    if args.check {
        println!("Run `neptune upgrade` to install it.");
        return Ok(ExitCode::Success);
    }

    let exe = std::env::current_exe().context("locating the running binary")?;
    upgrader.perform(&info, &exe).await?;
    println!("Upgraded to {}.", info.latest_version);
    Ok(ExitCode::Success)
}
