// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for the Neptune platform API.
//!
//! Every call except the token exchange goes through [`TokenGuard`], so an
//! absent or expired credential fails before any request leaves the process.

use std::fmt;
use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::credential::flow::CodeExchange;
use crate::credential::guard::TokenGuard;
use crate::credential::oauth::{urlencoding, TokenRequest, TokenResponse};
use crate::credential::{CredentialRecord, TokenKind};
use crate::error::AuthError;
use crate::monitor::{DeploymentStatus, StatusSource};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub method: String,
    pub path: String,
    pub status: u16,
    pub body: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} returned HTTP {}", self.method, self.path, self.status)?;
        if !self.body.is_empty() {
            write!(f, ": {}", self.body)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

/// Contents of `neptune.json`: a project name plus whatever resource
/// definitions the platform accepts, passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSpec {
    pub name: String,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningStatus {
    #[serde(default)]
    pub current: Option<String>,
    #[serde(default)]
    pub public_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub provisioning_state: String,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub running_status: Option<RunningStatus>,
}

impl Project {
    /// Infrastructure is ready and no resource is still pending.
    pub fn is_ready(&self) -> bool {
        self.provisioning_state == "Ready" && self.resources.iter().all(|r| r.status != "Pending")
    }

    pub fn url(&self) -> Option<String> {
        let ip = self.running_status.as_ref()?.public_ip.as_deref()?;
        Some(format!("http://{ip}"))
    }
}

#[derive(Debug, Deserialize)]
struct ProjectList {
    #[serde(default)]
    projects: Vec<Project>,
}

/// Deployment revisions come back as either numbers or names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Revision {
    Number(u64),
    Name(String),
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Name(s) => f.write_str(s),
        }
    }
}

/// Response to creating a deployment.
#[derive(Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub revision: Revision,
    pub status: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_token: Option<String>,
}

impl fmt::Debug for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deployment")
            .field("id", &self.id)
            .field("revision", &self.revision)
            .field("status", &self.status)
            .field("image", &self.image)
            .field("push_token", &self.push_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: String,
}

#[derive(Debug, Deserialize)]
struct LogsBody {
    #[serde(default)]
    logs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BucketKeys {
    #[serde(default)]
    keys: Vec<String>,
}

/// Database connection details with a short-lived scoped token.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub database: String,
    pub token: String,
    /// Epoch seconds.
    pub expires_at: u64,
}

impl ConnectionInfo {
    /// The scoped token as a resource credential, so it can be checked with
    /// the same expiry rule as the session.
    pub fn credential(&self, now: u64) -> CredentialRecord {
        CredentialRecord {
            access_token: self.token.clone(),
            issued_at: now,
            expires_at: self.expires_at,
            token_kind: TokenKind::Resource,
        }
    }
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("database", &self.database)
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Client for the platform REST API.
pub struct ApiClient {
    base_url: String,
    client: Client,
    guard: TokenGuard,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, guard: TokenGuard) -> Self {
        crate::ensure_crypto();
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("neptune/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self::with_http(base_url, guard, client)
    }

    /// Use a preconfigured HTTP client.
    pub fn with_http(base_url: impl Into<String>, guard: TokenGuard, client: Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { base_url, client, guard }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn guard(&self) -> &TokenGuard {
        &self.guard
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send an authenticated request and reject non-2xx responses.
    async fn send(
        &self,
        method: Method,
        path: &str,
        build: impl FnOnce(RequestBuilder) -> RequestBuilder,
    ) -> anyhow::Result<Response> {
        let req = build(self.client.request(method.clone(), self.url(path)));
        let resp = self
            .guard
            .with_auth(|token| async move { Ok(req.bearer_auth(token).send().await?) })
            .await?;
        debug!(%method, path, status = resp.status().as_u16(), "api response");
        check(method, path, resp).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let resp = self.send(Method::GET, path, |r| r).await?;
        Ok(resp.json().await?)
    }

    /// `GET /project/{name}`; `None` when the project does not exist.
    pub async fn get_project(&self, name: &str) -> anyhow::Result<Option<Project>> {
        match self.get_json(&format!("/project/{name}")).await {
            Ok(p) => Ok(Some(p)),
            Err(e) if e.downcast_ref::<ApiError>().is_some_and(|a| a.status == 404) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn list_projects(&self) -> anyhow::Result<Vec<Project>> {
        let list: ProjectList = self.get_json("/project").await?;
        Ok(list.projects)
    }

    pub async fn create_project(&self, spec: &ProjectSpec) -> anyhow::Result<()> {
        self.send(Method::POST, "/project", |r| r.json(spec)).await?;
        Ok(())
    }

    pub async fn update_project(&self, spec: &ProjectSpec) -> anyhow::Result<()> {
        self.send(Method::PUT, &format!("/project/{}", spec.name), |r| r.json(spec)).await?;
        Ok(())
    }

    pub async fn delete_project(&self, name: &str) -> anyhow::Result<()> {
        self.send(Method::DELETE, &format!("/project/{name}"), |r| r).await?;
        Ok(())
    }

    pub async fn create_deployment(&self, project: &str) -> anyhow::Result<Deployment> {
        let resp = self.send(Method::POST, &format!("/project/{project}/deploy"), |r| r).await?;
        Ok(resp.json().await?)
    }

    /// One status poll. An unrecognized status string is an error.
    pub async fn deployment_status(&self, deployment_id: &str) -> anyhow::Result<DeploymentStatus> {
        let body: StatusBody = self.get_json(&format!("/deployments/{deployment_id}/status")).await?;
        body.status.parse()
    }

    pub async fn deployment_logs(&self, deployment_id: &str) -> anyhow::Result<Vec<String>> {
        let body: LogsBody = self.get_json(&format!("/deployments/{deployment_id}/logs")).await?;
        Ok(body.logs)
    }

    pub async fn database_connection_info(
        &self,
        project: &str,
        database: &str,
    ) -> anyhow::Result<ConnectionInfo> {
        self.get_json(&format!("/project/{project}/database/{database}/connection-info")).await
    }

    /// `GET /project/{project}/bucket/{bucket}`: every object key in the bucket.
    pub async fn list_bucket_keys(&self, project: &str, bucket: &str) -> anyhow::Result<Vec<String>> {
        let body: BucketKeys = self.get_json(&format!("/project/{project}/bucket/{bucket}")).await?;
        Ok(body.keys)
    }

    /// Raw bytes of one bucket object. `/` in `key` is kept as a path separator.
    pub async fn get_bucket_object(
        &self,
        project: &str,
        bucket: &str,
        key: &str,
    ) -> anyhow::Result<Vec<u8>> {
        let key = key.split('/').map(urlencoding).collect::<Vec<_>>().join("/");
        let path = format!("/project/{project}/bucket/{bucket}/object/{key}");
        let resp = self.send(Method::GET, &path, |r| r).await?;
        Ok(resp.bytes().await?.to_vec())
    }

    pub async fn set_secret(&self, project: &str, name: &str, value: &str) -> anyhow::Result<()> {
        let body = serde_json::json!({ "secret_name": name, "secret_string": value });
        self.send(Method::PUT, &format!("/project/{project}/secret"), |r| r.json(&body)).await?;
        Ok(())
    }
}

impl CodeExchange for ApiClient {
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> anyhow::Result<TokenResponse> {
        let path = "/auth/token";
        let body = TokenRequest::authorization_code(code, redirect_uri, code_verifier);
        let resp = self.client.post(self.url(path)).json(&body).send().await?;
        let resp = check(Method::POST, path, resp).await?;
        Ok(resp.json().await?)
    }
}

impl StatusSource for ApiClient {
    async fn fetch_status(&self, deployment_id: &str) -> anyhow::Result<DeploymentStatus> {
        self.deployment_status(deployment_id).await
    }
}

/// Turn a non-2xx response into [`ApiError`]. A 401 means the platform no
/// longer accepts the credential.
async fn check(method: Method, path: &str, resp: Response) -> anyhow::Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let err = ApiError {
        method: method.to_string(),
        path: path.to_owned(),
        status: status.as_u16(),
        body: body.trim().to_owned(),
    };
    if status == StatusCode::UNAUTHORIZED && path != "/auth/token" {
        return Err(anyhow::Error::new(AuthError::NotAuthenticated).context(err.to_string()));
    }
    Err(err.into())
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
