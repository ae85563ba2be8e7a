// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Project and deployment subcommands.

use std::time::Duration;

use anyhow::{bail, Context as _};
use tokio::io::AsyncReadExt;

use super::{format_table, Context};
use crate::api::Project;
use crate::credential::{epoch_secs, format_remaining};
use crate::deploy::{self, DeployOptions, DockerCli, WaitOutcome};
use crate::error::ExitCode;

/// Bounds for commands that wait on the platform.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct WaitArgs {
    /// Seconds to wait before giving up (result is then inconclusive).
    #[arg(long)]
    pub max_wait: Option<u64>,
    /// Seconds between status polls.
    #[arg(long)]
    pub poll_interval: Option<u64>,
}

impl WaitArgs {
    /// Flags override the configured defaults.
    pub fn resolve(&self, ctx: &Context) -> (Duration, Duration) {
        let max_wait = self.max_wait.map(Duration::from_secs).unwrap_or(ctx.settings.max_wait);
        let poll = self
            .poll_interval
            .map(Duration::from_secs)
            .unwrap_or(ctx.settings.poll_interval)
            .max(Duration::from_secs(1));
        (max_wait, poll)
    }
}

pub(super) fn project_name(ctx: &Context) -> anyhow::Result<String> {
    Ok(deploy::read_project_spec(&ctx.working_dir)?.name)
}

fn print_project(project: &Project) {
    println!("Project:  {}", project.name);
    println!("State:    {}", project.provisioning_state);
    if let Some(url) = project.url() {
        println!("URL:      {url}");
    }
    if !project.resources.is_empty() {
        let rows: Vec<Vec<String>> = project
            .resources
            .iter()
            .map(|r| vec![r.kind.clone(), r.name.clone(), r.status.clone()])
            .collect();
        println!();
        println!("{}", format_table(&["KIND", "NAME", "STATUS"], &rows));
    }
}

/// Print the terminal status; on failure also the logs and a hint.
fn report_outcome(deployment_id: &str, outcome: &WaitOutcome) -> ExitCode {
    let status = outcome.observation.status;
    if outcome.succeeded() {
        println!("Deployment {deployment_id} is {status}.");
        return ExitCode::Success;
    }
    println!("Deployment {deployment_id} ended with status {status}.");
    if !outcome.logs.is_empty() {
        println!();
        println!("Logs:");
        for line in &outcome.logs {
            println!("  {line}");
        }
    }
    println!();
    println!("Check the logs above, fix the cause, and run `neptune deploy` again.");
    ExitCode::Failure
}

pub async fn provision(ctx: &Context) -> anyhow::Result<ExitCode> {
    let spec = deploy::read_project_spec(&ctx.working_dir)?;
    let api = ctx.api();
    let project = deploy::provision(
        &api,
        &spec,
        ctx.settings.max_wait,
        ctx.settings.poll_interval,
        &ctx.progress(),
    )
    .await?;
    print_project(&project);
    Ok(ExitCode::Success)
}

pub async fn deploy(ctx: &Context, args: &WaitArgs) -> anyhow::Result<ExitCode> {
    let (max_wait, poll_interval) = args.resolve(ctx);
    let opts = DeployOptions { working_dir: ctx.working_dir.clone(), max_wait, poll_interval };
    let api = ctx.api();
    let report = deploy::deploy(&api, &DockerCli::default(), &opts, &ctx.progress()).await?;

    let code = report_outcome(&report.deployment.id, &report.outcome);
    if code == ExitCode::Success {
        if let Some(url) = report.project.url() {
            println!("Available at {url}");
        }
    }
    Ok(code)
}

pub async fn status(ctx: &Context, deployment: Option<&str>) -> anyhow::Result<ExitCode> {
    let name = project_name(ctx)?;
    let api = ctx.api();
    let Some(project) = api.get_project(&name).await? else {
        bail!("project '{name}' does not exist; run `neptune provision`");
    };
    print_project(&project);
    if let Some(id) = deployment {
        let status = api.deployment_status(id).await?;
        println!();
        println!("Deployment {id}: {status}");
    }
    Ok(ExitCode::Success)
}

pub async fn wait(ctx: &Context, deployment_id: &str, args: &WaitArgs) -> anyhow::Result<ExitCode> {
    let (max_wait, poll_interval) = args.resolve(ctx);
    let api = ctx.api();
    let outcome =
        deploy::wait_and_collect(&api, deployment_id, max_wait, poll_interval, &ctx.progress())
            .await?;
    Ok(report_outcome(deployment_id, &outcome))
}

pub async fn logs(ctx: &Context, deployment_id: &str) -> anyhow::Result<ExitCode> {
    for line in ctx.api().deployment_logs(deployment_id).await? {
        println!("{line}");
    }
    Ok(ExitCode::Success)
}

pub async fn db_info(ctx: &Context, database: &str) -> anyhow::Result<ExitCode> {
    let name = project_name(ctx)?;
    let info = ctx
        .api()
        .database_connection_info(&name, database)
        .await
        .with_context(|| format!("fetching connection info for '{database}'"))?;

    let now = epoch_secs();
    let credential = info.credential(now);
    ctx.guard().ensure_usable(&credential, now)?;

    println!("Host:      {}", info.host);
    println!("Port:      {}", info.port);
    println!("Database:  {}", info.database);
    println!("Username:  {}", info.username);
    println!("Password:  {}", info.token);
    if let Some(remaining) = credential.remaining_at(now) {
        println!();
        println!(
            "The password is a temporary token and expires in {}.",
            format_remaining(remaining)
        );
    }
    Ok(ExitCode::Success)
}

pub async fn secret(ctx: &Context, secret_name: &str) -> anyhow::Result<ExitCode> {
    let name = project_name(ctx)?;
    let mut value = String::new();
    tokio::io::stdin().read_to_string(&mut value).await.context("reading secret from stdin")?;
    let value = value.trim_end_matches(['\r', '\n']);
    if value.is_empty() {
        bail!("secret value is empty; pipe it on stdin");
    }
    ctx.api().set_secret(&name, secret_name, value).await?;
    println!("Secret '{secret_name}' set for project '{name}'.");
    Ok(ExitCode::Success)
}

pub async fn projects(ctx: &Context) -> anyhow::Result<ExitCode> {
    let projects = ctx.api().list_projects().await?;
    if projects.is_empty() {
        println!("No projects.");
        return Ok(ExitCode::Success);
    }
    let rows: Vec<Vec<String>> = projects
        .iter()
        .map(|p| vec![p.name.clone(), p.provisioning_state.clone(), p.url().unwrap_or_default()])
        .collect();
    println!("{}", format_table(&["NAME", "STATE", "URL"], &rows));
    Ok(ExitCode::Success)
}

pub async fn delete(ctx: &Context, name: Option<&str>, yes: bool) -> anyhow::Result<ExitCode> {
    let name = match name {
        Some(n) => n.to_owned(),
        None => project_name(ctx)?,
    };
    if !yes {
        eprintln!("error: refusing to delete project '{name}' without --yes");
        return Ok(ExitCode::Usage);
    }
    ctx.api().delete_project(&name).await.with_context(|| format!("deleting project '{name}'"))?;
    println!("Project '{name}' deleted.");
    Ok(ExitCode::Success)
}
