// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `neptune mcp`: the CLI workflows as Model Context Protocol tools on stdio.
//!
//! Every tool is a thin caller of the same flows the subcommands use. stdout
//! carries the protocol, so progress lines go to the log on stderr.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rmcp::{
    model::{
        CallToolRequestParam, CallToolResult, Content, Implementation, JsonObject,
        ListToolsResult, PaginatedRequestParam, ProtocolVersion, ServerCapabilities, ServerInfo,
        Tool, ToolAnnotations,
    },
    service::RequestContext,
    ErrorData as McpError, RoleServer, ServerHandler, ServiceExt,
};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::api::{ApiClient, ApiError};
use crate::command::Context;
use crate::credential::flow::{AuthFlow, Browser, NoBrowser, SystemBrowser};
use crate::credential::{epoch_secs, format_remaining};
use crate::deploy::{self, DeployOptions, DockerCli, Progress, WaitOutcome};
use crate::error::{AuthError, MonitorError};
use crate::monitor::MIN_POLL_INTERVAL;

const INSTRUCTIONS: &str = "Neptune deployment platform (stdio). Typical flow: login, \
provision_resources, deploy_project, then wait_for_deployment or get_deployment_status; \
use get_logs whenever a deployment is not Running. Project tools act on the neptune.json \
in the server's working directory.";

#[derive(Debug, Default, serde::Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct NoArgs {}

#[derive(Debug, Default, serde::Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct LoginArgs {
    /// Only print the login URL instead of opening a browser.
    #[serde(default)]
    pub no_browser: bool,
    /// Seconds to wait for the browser callback.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, serde::Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DeployArgs {
    #[serde(default)]
    pub max_wait_secs: Option<u64>,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
}

#[derive(Debug, Default, serde::Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct StatusArgs {
    /// Also report this deployment's status.
    #[serde(default)]
    pub deployment_id: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WaitArgs {
    pub deployment_id: String,
    #[serde(default)]
    pub max_wait_secs: Option<u64>,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
}

#[derive(Debug, Default, serde::Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct LogsArgs {
    pub deployment_id: String,
}

#[derive(Debug, Default, serde::Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DeleteArgs {
    /// Defaults to the project in neptune.json.
    #[serde(default)]
    pub project_name: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SecretArgs {
    pub secret_name: String,
    pub secret_value: String,
}

#[derive(Debug, Default, serde::Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DatabaseArgs {
    pub database_name: String,
}

#[derive(Debug, Default, serde::Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct BucketArgs {
    pub bucket_name: String,
}

#[derive(Debug, Default, serde::Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct BucketObjectArgs {
    pub bucket_name: String,
    pub key: String,
}

/// The MCP server: one resolved CLI context and its API client.
pub struct NeptuneMcp {
    ctx: Context,
    api: ApiClient,
}

impl NeptuneMcp {
    pub fn new(ctx: Context) -> Self {
        let api = ctx.api();
        Self { ctx, api }
    }

    pub fn with_api(ctx: Context, api: ApiClient) -> Self {
        Self { ctx, api }
    }

    pub fn tools() -> Vec<Tool> {
        vec![
            tool(
                "login",
                "Log in to Neptune through the browser and store the session.",
                tool_input_schema::<LoginArgs>(),
                false,
            ),
            tool(
                "provision_resources",
                "Create or update the project from neptune.json and wait until its resources are ready.",
                tool_input_schema::<NoArgs>(),
                false,
            ),
            tool(
                "deploy_project",
                "Provision, build and push the image from the Dockerfile, deploy, and wait for the result.",
                tool_input_schema::<DeployArgs>(),
                false,
            ),
            tool(
                "get_deployment_status",
                "Project provisioning state, resources and URL; optionally one deployment's status.",
                tool_input_schema::<StatusArgs>(),
                true,
            ),
            tool(
                "wait_for_deployment",
                "Poll a deployment until it is Running, Stopped or Error. Returns logs on failure.",
                tool_input_schema::<WaitArgs>(),
                true,
            ),
            tool(
                "get_logs",
                "Fetch the logs of a deployment.",
                tool_input_schema::<LogsArgs>(),
                true,
            ),
            tool(
                "list_projects",
                "List every project in the account.",
                tool_input_schema::<NoArgs>(),
                true,
            ),
            tool(
                "delete_project",
                "Permanently delete a project and all its resources.",
                tool_input_schema::<DeleteArgs>(),
                false,
            ),
            tool(
                "set_secret_value",
                "Set the value of a project secret.",
                tool_input_schema::<SecretArgs>(),
                false,
            ),
            tool(
                "get_database_connection_info",
                "Connection details and a temporary token for a project database.",
                tool_input_schema::<DatabaseArgs>(),
                true,
            ),
            tool(
                "list_bucket_files",
                "List the object keys in a project storage bucket.",
                tool_input_schema::<BucketArgs>(),
                true,
            ),
            tool(
                "get_bucket_object",
                "Read one object from a project storage bucket (UTF-8 text, or base64 for binary data).",
                tool_input_schema::<BucketObjectArgs>(),
                true,
            ),
        ]
    }

    /// Run one tool. Bad arguments are a protocol error; a failing workflow is
    /// an `is_error` result carrying a structured `{status, code, message, next_step}`.
    pub async fn dispatch(
        &self,
        name: &str,
        args: Option<JsonObject>,
    ) -> Result<CallToolResult, McpError> {
        let outcome = match name {
            "login" => self.login(deserialize_args(args)?).await,
            "provision_resources" => {
                deserialize_args::<NoArgs>(args)?;
                self.provision().await
            }
            "deploy_project" => self.deploy(deserialize_args(args)?).await,
            "get_deployment_status" => self.status(deserialize_args(args)?).await,
            "wait_for_deployment" => self.wait(deserialize_args(args)?).await,
            "get_logs" => self.logs(deserialize_args(args)?).await,
            "list_projects" => {
                deserialize_args::<NoArgs>(args)?;
                self.list_projects().await
            }
            "delete_project" => self.delete(deserialize_args(args)?).await,
            "set_secret_value" => self.set_secret(deserialize_args(args)?).await,
            "get_database_connection_info" => self.database(deserialize_args(args)?).await,
            "list_bucket_files" => self.list_bucket(deserialize_args(args)?).await,
            "get_bucket_object" => self.bucket_object(deserialize_args(args)?).await,
            other => {
                return Ok(CallToolResult {
                    content: vec![Content::text(format!("unknown tool: {other}"))],
                    structured_content: None,
                    is_error: Some(true),
                    meta: None,
                })
            }
        };
        Ok(match outcome {
            Ok(value) => tool_result(value),
            Err(e) => {
                warn!(tool = name, code = error_code(&e), err = %e, "tool failed");
                CallToolResult::structured_error(error_envelope(&e))
            }
        })
    }

    fn progress(&self) -> Progress {
        Arc::new(|line: &str| info!(target: "neptune::mcp", "{}", line.trim()))
    }

    fn project_name(&self) -> anyhow::Result<String> {
        Ok(deploy::read_project_spec(&self.ctx.working_dir)?.name)
    }

    fn bounds(&self, max_wait_secs: Option<u64>, poll_interval_secs: Option<u64>) -> (Duration, Duration) {
        let max_wait = max_wait_secs.map(Duration::from_secs).unwrap_or(self.ctx.settings.max_wait);
        let poll = poll_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(self.ctx.settings.poll_interval)
            .max(MIN_POLL_INTERVAL);
        (max_wait, poll)
    }

    async fn login(&self, args: LoginArgs) -> anyhow::Result<Value> {
        let timeout =
            args.timeout_secs.map(Duration::from_secs).unwrap_or(self.ctx.settings.login_timeout);
        let record = if args.no_browser {
            self.authenticate(NoBrowser, timeout).await?
        } else {
            self.authenticate(SystemBrowser, timeout).await?
        };
        let remaining = record.remaining_at(epoch_secs()).map(format_remaining).unwrap_or_default();
        Ok(json!({
            "status": "success",
            "token_kind": record.token_kind.to_string(),
            "expires_at": record.expires_at,
            "message": format!("logged in; session valid for {remaining}"),
            "next_step": "provision the project with 'provision_resources'",
        }))
    }

    async fn authenticate<B: Browser>(
        &self,
        browser: B,
        timeout: Duration,
    ) -> anyhow::Result<crate::credential::CredentialRecord> {
        AuthFlow::new(&self.ctx.settings.api_url, self.ctx.api(), browser, self.ctx.store())
            .with_timeout(timeout)
            .authenticate()
            .await
    }

    async fn provision(&self) -> anyhow::Result<Value> {
        let spec = deploy::read_project_spec(&self.ctx.working_dir)?;
        let project = deploy::provision(
            &self.api,
            &spec,
            self.ctx.settings.max_wait,
            self.ctx.settings.poll_interval,
            &self.progress(),
        )
        .await?;
        Ok(json!({
            "status": "success",
            "project": project,
            "message": "all resources are provisioned; the project is ready for deployment",
            "next_step": "deploy the project with 'deploy_project'",
        }))
    }

    async fn deploy(&self, args: DeployArgs) -> anyhow::Result<Value> {
        let (max_wait, poll_interval) = self.bounds(args.max_wait_secs, args.poll_interval_secs);
        let opts =
            DeployOptions { working_dir: self.ctx.working_dir.clone(), max_wait, poll_interval };
        let report = deploy::deploy(&self.api, &DockerCli::default(), &opts, &self.progress()).await?;
        let mut value = outcome_value(&report.deployment.id, &report.outcome);
        value["revision"] = json!(report.deployment.revision.to_string());
        value["url"] = json!(report.project.url());
        Ok(value)
    }

    async fn status(&self, args: StatusArgs) -> anyhow::Result<Value> {
        let name = self.project_name()?;
        let Some(project) = self.api.get_project(&name).await? else {
            anyhow::bail!("project '{name}' does not exist; provision it with 'provision_resources'");
        };
        let mut value = json!({
            "status": "success",
            "project": project,
            "url": project.url(),
            "next_step": "use 'get_logs' if the service is not Running",
        });
        if let Some(id) = args.deployment_id {
            let status = self.api.deployment_status(&id).await?;
            value["deployment"] = json!({ "id": id, "status": status.as_str() });
        }
        Ok(value)
    }

    async fn wait(&self, args: WaitArgs) -> anyhow::Result<Value> {
        let (max_wait, poll_interval) = self.bounds(args.max_wait_secs, args.poll_interval_secs);
        let outcome = deploy::wait_and_collect(
            &self.api,
            &args.deployment_id,
            max_wait,
            poll_interval,
            &self.progress(),
        )
        .await?;
        Ok(outcome_value(&args.deployment_id, &outcome))
    }

    async fn logs(&self, args: LogsArgs) -> anyhow::Result<Value> {
        let logs = self.api.deployment_logs(&args.deployment_id).await?;
        Ok(json!({
            "status": "success",
            "deployment_id": args.deployment_id,
            "logs": logs,
            "next_step": "fix the cause of any errors above and redeploy with 'deploy_project'",
        }))
    }

    async fn list_projects(&self) -> anyhow::Result<Value> {
        let projects = self.api.list_projects().await?;
        Ok(json!({
            "status": "success",
            "count": projects.len(),
            "projects": projects,
            "next_step": "use 'get_deployment_status' from a project directory, or create one with 'provision_resources'",
        }))
    }

    async fn delete(&self, args: DeleteArgs) -> anyhow::Result<Value> {
        let name = match args.project_name {
            Some(n) => n,
            None => self.project_name()?,
        };
        self.api.delete_project(&name).await?;
        Ok(json!({
            "status": "success",
            "message": format!("project '{name}' deleted"),
            "next_step": "the project and all its resources have been permanently deleted",
        }))
    }

    async fn set_secret(&self, args: SecretArgs) -> anyhow::Result<Value> {
        anyhow::ensure!(!args.secret_value.is_empty(), "secret value is empty");
        let name = self.project_name()?;
        self.api.set_secret(&name, &args.secret_name, &args.secret_value).await?;
        Ok(json!({
            "status": "success",
            "message": format!("secret '{}' set for project '{name}'", args.secret_name),
            "next_step": "redeploy with 'deploy_project' so the service picks up the new value",
        }))
    }

    async fn database(&self, args: DatabaseArgs) -> anyhow::Result<Value> {
        let name = self.project_name()?;
        let info = self.api.database_connection_info(&name, &args.database_name).await?;
        let now = epoch_secs();
        self.ctx.guard().ensure_usable(&info.credential(now), now)?;
        Ok(json!({
            "status": "success",
            "connection": info,
            "next_step": "the token is temporary; fetch fresh details once it expires",
        }))
    }

    async fn list_bucket(&self, args: BucketArgs) -> anyhow::Result<Value> {
        let name = self.project_name()?;
        let keys = self.api.list_bucket_keys(&name, &args.bucket_name).await?;
        Ok(json!({
            "status": "success",
            "bucket_name": args.bucket_name,
            "files": keys,
            "next_step": "read an object with 'get_bucket_object'",
        }))
    }

    async fn bucket_object(&self, args: BucketObjectArgs) -> anyhow::Result<Value> {
        let name = self.project_name()?;
        let data = self.api.get_bucket_object(&name, &args.bucket_name, &args.key).await?;
        let size = data.len();
        let (encoding, content) = match String::from_utf8(data) {
            Ok(text) => ("utf-8", text),
            Err(e) => ("base64", STANDARD.encode(e.into_bytes())),
        };
        Ok(json!({
            "status": "success",
            "bucket_name": args.bucket_name,
            "key": args.key,
            "size": size,
            "encoding": encoding,
            "content": content,
        }))
    }
}

/// Serve on stdin/stdout until the client disconnects.
pub async fn serve_stdio(ctx: Context) -> anyhow::Result<()> {
    info!(working_dir = %ctx.working_dir.display(), "mcp server starting");
    let service = NeptuneMcp::new(ctx).serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;
    Ok(())
}

impl ServerHandler for NeptuneMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_06_18,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: env!("CARGO_CRATE_NAME").to_string(),
                title: Some("Neptune".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(INSTRUCTIONS.to_string()),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult { tools: Self::tools(), next_cursor: None }))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.dispatch(request.name.as_ref(), request.arguments).await
    }
}

fn tool_input_schema<T: schemars::JsonSchema + 'static>() -> Arc<JsonObject> {
    Arc::new(rmcp::handler::server::tool::schema_for_type::<T>())
}

fn tool(
    name: &'static str,
    description: &'static str,
    input_schema: Arc<JsonObject>,
    read_only: bool,
) -> Tool {
    Tool::new(name, description, input_schema)
        .annotate(ToolAnnotations::new().read_only(read_only).destructive(!read_only))
}

fn deserialize_args<T: serde::de::DeserializeOwned>(args: Option<JsonObject>) -> Result<T, McpError> {
    let value = Value::Object(args.unwrap_or_default());
    serde_json::from_value(value).map_err(|e| McpError::invalid_params(e.to_string(), None))
}

/// Envelope for a terminal deployment outcome. Stopped/Error is a failed
/// result that carries the logs.
fn outcome_value(deployment_id: &str, outcome: &WaitOutcome) -> Value {
    let status = outcome.observation.status;
    if outcome.succeeded() {
        return json!({
            "status": "success",
            "deployment_id": deployment_id,
            "deployment_status": status.as_str(),
            "polls": outcome.observation.attempt,
            "next_step": "the service is running",
        });
    }
    json!({
        "status": "error",
        "code": "DEPLOYMENT_FAILED",
        "deployment_id": deployment_id,
        "deployment_status": status.as_str(),
        "polls": outcome.observation.attempt,
        "logs": outcome.logs,
        "message": format!("deployment {deployment_id} ended with status {status}"),
        "next_step": "read the logs, fix the cause, and redeploy with 'deploy_project'",
    })
}

fn tool_result(value: Value) -> CallToolResult {
    let ok = value.get("status").and_then(Value::as_str) == Some("success");
    CallToolResult {
        content: vec![Content::text(value.to_string())],
        structured_content: Some(value),
        is_error: Some(!ok),
        meta: None,
    }
}

/// Stable code for the first domain error in the chain.
fn error_code(err: &anyhow::Error) -> &'static str {
    for cause in err.chain() {
        if let Some(auth) = cause.downcast_ref::<AuthError>() {
            return auth.as_str();
        }
        if let Some(monitor) = cause.downcast_ref::<MonitorError>() {
            return monitor.as_str();
        }
        if cause.downcast_ref::<ApiError>().is_some() {
            return "API_ERROR";
        }
    }
    "E_UNEXPECTED"
}

fn next_step(code: &str) -> &'static str {
    match code {
        "NOT_AUTHENTICATED" | "EXPIRED" => "log in with the 'login' tool, then retry",
        "AUTH_TIMEOUT" | "STATE_MISMATCH" | "EXCHANGE_FAILED" => "run the 'login' tool again",
        "MONITOR_TIMEOUT" => {
            "the result is inconclusive; check again with 'get_deployment_status' or 'wait_for_deployment'"
        }
        "UNREACHABLE" => "the platform could not be reached; retry 'wait_for_deployment' shortly",
        _ => "check the error message, fix the cause, and try again",
    }
}

fn error_envelope(err: &anyhow::Error) -> Value {
    let code = error_code(err);
    json!({
        "status": "error",
        "code": code,
        "message": format!("{err:#}"),
        "next_step": next_step(code),
    })
}

#[cfg(test)]
#[path = "mcp_tests.rs"]
mod tests;
