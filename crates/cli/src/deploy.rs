// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Provision → build/push → deploy → wait → logs.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, Deployment, Project, ProjectSpec};
use crate::monitor::{DeploymentMonitor, DeploymentObservation, MIN_POLL_INTERVAL};

pub const PROJECT_FILE: &str = "neptune.json";

/// Progress callback for human-readable status lines.
pub type Progress = Arc<dyn Fn(&str) + Send + Sync>;

/// Read and validate `neptune.json` from `dir`.
pub fn read_project_spec(dir: &Path) -> anyhow::Result<ProjectSpec> {
    let path = dir.join(PROJECT_FILE);
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            bail!("{PROJECT_FILE} not found at {}", path.display())
        }
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    let spec: ProjectSpec = serde_json::from_str(&contents)
        .with_context(|| format!("parsing {}", path.display()))?;
    if spec.name.trim().is_empty() {
        bail!("{}: \"name\" must not be empty", path.display());
    }
    Ok(spec)
}

/// Builds the deployment image and pushes it to the registry.
pub trait ImageBuilder: Send + Sync {
    fn build_and_push(
        &self,
        context_dir: &Path,
        image: &str,
        push_token: Option<&str>,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// The local `docker` CLI.
pub struct DockerCli {
    pub platform: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self { platform: "linux/amd64".to_owned() }
    }
}

impl ImageBuilder for DockerCli {
    async fn build_and_push(
        &self,
        context_dir: &Path,
        image: &str,
        push_token: Option<&str>,
    ) -> anyhow::Result<()> {
        if let Some(token) = push_token {
            let registry = image.split('/').next().unwrap_or(image);
            docker_login(registry, token).await?;
        }

        let dockerfile = context_dir.join("Dockerfile");
        run_docker(&[
            "build",
            "--platform",
            &self.platform,
            "-t",
            image,
            "-f",
            &dockerfile.to_string_lossy(),
            &context_dir.to_string_lossy(),
        ])
        .await
        .context("docker build failed")?;

        run_docker(&["push", image]).await.context("docker push failed")
    }
}

async fn docker_login(registry: &str, token: &str) -> anyhow::Result<()> {
    debug!(registry, "docker login");
    let mut child = Command::new("docker")
        .args(["login", "-u", "AWS", "--password-stdin", registry])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(docker_spawn_error)?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(token.as_bytes()).await?;
    }
    let out = child.wait_with_output().await?;
    if !out.status.success() {
        bail!("docker login to {registry} failed: {}", String::from_utf8_lossy(&out.stderr).trim());
    }
    Ok(())
}

async fn run_docker(args: &[&str]) -> anyhow::Result<()> {
    debug!(?args, "docker");
    let status = Command::new("docker")
        .args(args)
        .stdin(Stdio::null())
        .status()
        .await
        .map_err(docker_spawn_error)?;
    if !status.success() {
        bail!("docker {} exited with {status}", args.first().copied().unwrap_or_default());
    }
    Ok(())
}

fn docker_spawn_error(e: std::io::Error) -> anyhow::Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        anyhow::anyhow!("docker is not installed or not in PATH")
    } else {
        anyhow::Error::new(e).context("running docker")
    }
}

/// Create or update the project, then wait until its infrastructure is
/// ready or `max_wait` elapses.
pub async fn provision(
    api: &ApiClient,
    spec: &ProjectSpec,
    max_wait: Duration,
    poll_interval: Duration,
    progress: &Progress,
) -> anyhow::Result<Project> {
    let name = &spec.name;
    if api.get_project(name).await?.is_none() {
        progress(&format!("Creating project '{name}'..."));
        api.create_project(spec).await.context("creating project")?;
    } else {
        progress(&format!("Updating project '{name}'..."));
        api.update_project(spec).await.context("updating project")?;
    }

    progress("Waiting for infrastructure to be ready...");
    let poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
    let deadline = Instant::now() + max_wait;
    loop {
        let project = api.get_project(name).await?;
        let state = match project {
            Some(p) if p.is_ready() => {
                info!(project = %name, resources = p.resources.len(), "project provisioned");
                return Ok(p);
            }
            Some(p) => p.provisioning_state,
            None => "Missing".to_owned(),
        };
        let now = Instant::now();
        if now >= deadline {
            bail!(
                "project '{name}' not ready after {}s (provisioning state: {state})",
                max_wait.as_secs()
            );
        }
        debug!(project = %name, %state, "project not ready");
        tokio::time::sleep(poll_interval.min(deadline - now)).await;
    }
}

/// Terminal observation plus logs when the deployment did not come up.
#[derive(Debug, Clone)]
pub struct WaitOutcome {
    pub observation: DeploymentObservation,
    pub logs: Vec<String>,
}

impl WaitOutcome {
    pub fn succeeded(&self) -> bool {
        !self.observation.status.is_failure()
    }
}

/// Run the monitor and, on Stopped/Error, fetch the deployment logs.
pub async fn wait_and_collect(
    api: &ApiClient,
    deployment_id: &str,
    max_wait: Duration,
    poll_interval: Duration,
    progress: &Progress,
) -> anyhow::Result<WaitOutcome> {
    let sink = Arc::clone(progress);
    let monitor = DeploymentMonitor::new(api).on_observation(move |obs| {
        sink(&format!("  [{}] {}", obs.attempt, obs.status));
    });
    let observation = monitor.wait_for(deployment_id, max_wait, poll_interval).await?;

    let mut logs = Vec::new();
    if observation.status.is_failure() {
        match api.deployment_logs(deployment_id).await {
            Ok(lines) => logs = lines,
            Err(e) => warn!(deployment_id, err = %e, "could not fetch deployment logs"),
        }
    }
    Ok(WaitOutcome { observation, logs })
}

pub struct DeployOptions {
    pub working_dir: PathBuf,
    pub max_wait: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct DeployReport {
    pub project: Project,
    pub deployment: Deployment,
    pub outcome: WaitOutcome,
}

/// Full deploy of the project in `opts.working_dir`.
pub async fn deploy<B: ImageBuilder>(
    api: &ApiClient,
    builder: &B,
    opts: &DeployOptions,
    progress: &Progress,
) -> anyhow::Result<DeployReport> {
    let spec = read_project_spec(&opts.working_dir)?;
    if !opts.working_dir.join("Dockerfile").is_file() {
        bail!("Dockerfile not found in {}", opts.working_dir.display());
    }

    progress("Provisioning infrastructure...");
    provision(api, &spec, opts.max_wait, opts.poll_interval, progress).await?;

    progress("Creating deployment...");
    let deployment = api.create_deployment(&spec.name).await.context("creating deployment")?;
    info!(deployment_id = %deployment.id, revision = %deployment.revision, "deployment created");

    if !deployment.image.is_empty() {
        progress(&format!("Building and pushing {}...", deployment.image));
        builder
            .build_and_push(&opts.working_dir, &deployment.image, deployment.push_token.as_deref())
            .await?;
    }

    progress(&format!("Waiting for deployment {} to start...", deployment.id));
    let outcome =
        wait_and_collect(api, &deployment.id, opts.max_wait, opts.poll_interval, progress)
            .await
            .with_context(|| format!("waiting for deployment {}", deployment.id))?;

    let project = api
        .get_project(&spec.name)
        .await?
        .with_context(|| format!("project '{}' disappeared after deploy", spec.name))?;
    Ok(DeployReport { project, deployment, outcome })
}

#[cfg(test)]
#[path = "deploy_tests.rs"]
mod tests;
