// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `neptune bucket`: read objects from the project's storage buckets.

use std::path::PathBuf;

use anyhow::Context as _;
use tokio::io::AsyncWriteExt;

use super::project::project_name;
use super::Context;
use crate::error::ExitCode;

/// CLI arguments for `neptune bucket`.
#[derive(Debug, clap::Args)]
pub struct BucketArgs {
    #[command(subcommand)]
    pub command: BucketCommand,
}

#[derive(Debug, clap::Subcommand)]
pub enum BucketCommand {
    /// List the object keys in a bucket.
    Ls {
        bucket: String,
    },
    /// Download one object (to stdout unless --output is given).
    Get(GetArgs),
}

#[derive(Debug, clap::Args)]
pub struct GetArgs {
    pub bucket: String,
    pub key: String,
    /// Write the object to this file instead of stdout.
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

pub async fn run(ctx: &Context, args: &BucketArgs) -> anyhow::Result<ExitCode> {
    match args.command {
        BucketCommand::Ls { ref bucket } => ls(ctx, bucket).await,
        BucketCommand::Get(ref get_args) => get(ctx, get_args).await,
    }
}

async fn ls(ctx: &Context, bucket: &str) -> anyhow::Result<ExitCode> {
    let name = project_name(ctx)?;
    let keys = ctx
        .api()
        .list_bucket_keys(&name, bucket)
        .await
        .with_context(|| format!("listing bucket '{bucket}'"))?;
    if keys.is_empty() {
        eprintln!("Bucket '{bucket}' is empty.");
    }
    for key in keys {
        println!("{key}");
    }
    Ok(ExitCode::Success)
}

async fn get(ctx: &Context, args: &GetArgs) -> anyhow::Result<ExitCode> {
    let name = project_name(ctx)?;
    let data = ctx
        .api()
        .get_bucket_object(&name, &args.bucket, &args.key)
        .await
        .with_context(|| format!("fetching '{}' from bucket '{}'", args.key, args.bucket))?;

    match args.output {
        Some(ref path) => {
            let path = ctx.working_dir.join(path);
            tokio::fs::write(&path, &data)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            eprintln!("Wrote {} bytes to {}.", data.len(), path.display());
        }
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&data).await?;
            stdout.flush().await?;
        }
    }
    Ok(ExitCode::Success)
}
