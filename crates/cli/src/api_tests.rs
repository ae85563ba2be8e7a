// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::json;

use super::*;
use crate::test_support::MockServer;

type Seen = Arc<Mutex<Vec<(String, Option<String>, Value)>>>;

fn auth_header(headers: &HeaderMap) -> Option<String> {
    headers.get("authorization").and_then(|v| v.to_str().ok()).map(str::to_owned)
}

fn record(seen: &Seen, what: &str, headers: &HeaderMap, body: Value) {
    if let Ok(mut s) = seen.lock() {
        s.push((what.to_owned(), auth_header(headers), body));
    }
}

fn platform(seen: Seen) -> Router {
    Router::new()
        .route(
            "/project",
            get(|| async {
                Json(json!({ "projects": [
                    { "name": "alpha", "provisioning_state": "Ready", "resources": [] },
                    { "name": "beta", "provisioning_state": "Pending" },
                ]}))
            })
            .post(|State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>| async move {
                record(&seen, "create", &headers, body);
                StatusCode::CREATED
            }),
        )
        .route(
            "/project/{name}",
            get(|Path(name): Path<String>| async move {
                if name == "alpha" {
                    Ok(Json(json!({
                        "name": "alpha",
                        "provisioning_state": "Ready",
                        "resources": [{ "kind": "Database", "name": "db", "status": "Available" }],
                        "running_status": { "current": "Running", "public_ip": "203.0.113.7" },
                    })))
                } else {
                    Err((StatusCode::NOT_FOUND, "no such project"))
                }
            })
            .put(|State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>| async move {
                record(&seen, "update", &headers, body);
                StatusCode::OK
            })
            .delete(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        )
        .route(
            "/project/{name}/deploy",
            post(|Path(name): Path<String>| async move {
                Json(json!({
                    "id": format!("dep-{name}"),
                    "revision": 7,
                    "status": "Pending",
                    "image": "registry.example.com/alpha:7",
                    "push_token": "registry-secret",
                }))
            }),
        )
        .route(
            "/deployments/{id}/status",
            get(|Path(id): Path<String>| async move {
                let status = if id == "weird" { "Exploded" } else { "running" };
                Json(json!({ "status": status }))
            }),
        )
        .route(
            "/deployments/{id}/logs",
            get(|| async { Json(json!({ "logs": ["booting", "panic: port in use"] })) }),
        )
        .route(
            "/project/{name}/database/{db}/connection-info",
            get(|| async {
                Json(json!({
                    "host": "db.internal", "port": 5432, "username": "app",
                    "database": "main", "token": "db-token", "expires_at": 1_900_000_000u64,
                }))
            }),
        )
        .route(
            "/project/{name}/secret",
            put(|State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>| async move {
                record(&seen, "secret", &headers, body);
                StatusCode::NO_CONTENT
            }),
        )
        .route(
            "/project/{name}/bucket/{bucket}",
            get(|Path((_, bucket)): Path<(String, String)>| async move {
                if bucket == "assets" {
                    Ok(Json(json!({ "keys": ["logo.png", "css/site.css"] })))
                } else {
                    Err((StatusCode::NOT_FOUND, "no such bucket"))
                }
            }),
        )
        .route(
            "/project/{name}/bucket/{bucket}/object/{*key}",
            get(|headers: HeaderMap, Path((_, _, key)): Path<(String, String, String)>| async move {
                if auth_header(&headers).is_none() {
                    return Err(StatusCode::UNAUTHORIZED);
                }
                match key.as_str() {
                    "css/site.css" => Ok(b"body{}".to_vec()),
                    "logo.png" => Ok(vec![0x89, b'P', b'N', b'G', 0x00, 0xff]),
                    "with space.txt" => Ok(b"spaced".to_vec()),
                    _ => Err(StatusCode::NOT_FOUND),
                }
            }),
        )
        .route(
            "/auth/token",
            post(|State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>| async move {
                record(&seen, "token", &headers, body.clone());
                if body["code"] == "good" {
                    Ok(Json(json!({ "access_token": "session-tok", "expires_in": 3600 })))
                } else {
                    Err((StatusCode::BAD_REQUEST, "invalid_grant"))
                }
            }),
        )
        .with_state(seen)
}

async fn start() -> anyhow::Result<(MockServer, Seen, tempfile::TempDir)> {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let server = MockServer::start(platform(Arc::clone(&seen))).await?;
    Ok((server, seen, tempfile::tempdir()?))
}

fn seen(seen: &Seen) -> Vec<(String, Option<String>, Value)> {
    seen.lock().map(|s| s.clone()).unwrap_or_default()
}

#[tokio::test]
async fn get_project_parses_and_maps_404_to_none() -> anyhow::Result<()> {
    let (server, _, dir) = start().await?;
    let api = server.client(dir.path());

    let project = api.get_project("alpha").await?.ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert!(project.is_ready());
    assert_eq!(project.resources.len(), 1);
    assert_eq!(project.url().as_deref(), Some("http://203.0.113.7"));

    assert_eq!(api.get_project("ghost").await?, None);
    Ok(())
}

#[tokio::test]
async fn list_projects_tolerates_missing_fields() -> anyhow::Result<()> {
    let (server, _, dir) = start().await?;
    let projects = server.client(dir.path()).list_projects().await?;
    let names: Vec<_> = projects.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["alpha", "beta"]);
    assert!(!projects[1].is_ready());
    Ok(())
}

#[tokio::test]
async fn writes_send_bearer_token_and_body() -> anyhow::Result<()> {
    let (server, log, dir) = start().await?;
    let api = server.client(dir.path());
    let spec: ProjectSpec = serde_json::from_value(json!({ "name": "alpha", "kind": "Service" }))?;

    api.create_project(&spec).await?;
    api.update_project(&spec).await?;
    api.set_secret("alpha", "API_KEY", "s3cr3t").await?;

    let calls = seen(&log);
    assert_eq!(calls.len(), 3);
    for (_, auth, _) in &calls {
        assert_eq!(auth.as_deref(), Some("Bearer test-token"));
    }
    assert_eq!(calls[0].0, "create");
    assert_eq!(calls[0].2, json!({ "name": "alpha", "kind": "Service" }));
    assert_eq!(calls[1].0, "update");
    assert_eq!(calls[2].2, json!({ "secret_name": "API_KEY", "secret_string": "s3cr3t" }));
    Ok(())
}

#[tokio::test]
async fn non_2xx_carries_status_and_body() -> anyhow::Result<()> {
    let (server, _, dir) = start().await?;
    let err = server.client(dir.path()).delete_project("alpha").await.expect_err("500");
    let api_err = err.downcast_ref::<ApiError>().ok_or_else(|| anyhow::anyhow!("not ApiError: {err}"))?;
    assert_eq!(api_err.status, 500);
    assert_eq!(api_err.path, "/project/alpha");
    assert!(err.to_string().contains("DELETE /project/alpha returned HTTP 500"), "{err}");
    Ok(())
}

#[tokio::test]
async fn deployment_endpoints() -> anyhow::Result<()> {
    let (server, _, dir) = start().await?;
    let api = server.client(dir.path());

    let dep = api.create_deployment("alpha").await?;
    assert_eq!(dep.id, "dep-alpha");
    assert_eq!(dep.revision, Revision::Number(7));
    assert_eq!(dep.push_token.as_deref(), Some("registry-secret"));
    assert!(!format!("{dep:?}").contains("registry-secret"));

    assert_eq!(api.fetch_status("dep-alpha").await?, DeploymentStatus::Running);
    crate::assert_err_contains!(api.deployment_status("weird").await, "unknown deployment status");
    assert_eq!(api.deployment_logs("dep-alpha").await?, ["booting", "panic: port in use"]);
    Ok(())
}

#[tokio::test]
async fn connection_info_yields_resource_credential() -> anyhow::Result<()> {
    let (server, _, dir) = start().await?;
    let info = server.client(dir.path()).database_connection_info("alpha", "main").await?;
    assert_eq!(info.port, 5432);
    assert!(!format!("{info:?}").contains("db-token"));

    let cred = info.credential(1_000);
    assert_eq!(cred.token_kind, TokenKind::Resource);
    assert_eq!(cred.expires_at, 1_900_000_000);
    Ok(())
}

#[tokio::test]
async fn logged_out_client_sends_nothing() -> anyhow::Result<()> {
    let (server, log, dir) = start().await?;
    let api = server.logged_out_client(dir.path());
    let err = api.set_secret("alpha", "K", "V").await.expect_err("not logged in");
    assert_eq!(err.downcast_ref::<AuthError>(), Some(&AuthError::NotAuthenticated));
    assert!(seen(&log).is_empty());
    Ok(())
}

#[tokio::test]
async fn code_exchange_is_unauthenticated_and_reports_rejection() -> anyhow::Result<()> {
    let (server, log, dir) = start().await?;
    let api = server.logged_out_client(dir.path());

    let resp = api.exchange_code("good", "http://localhost:1/callback", "verifier").await?;
    assert_eq!(resp.access_token, "session-tok");
    assert_eq!(resp.expires_in, Some(3600));

    crate::assert_err_contains!(
        api.exchange_code("bad", "http://localhost:1/callback", "verifier").await,
        "invalid_grant"
    );

    let calls = seen(&log);
    assert_eq!(calls[0].1, None);
    assert_eq!(calls[0].2["grant_type"], "authorization_code");
    assert_eq!(calls[0].2["code_verifier"], "verifier");
    assert_eq!(calls[0].2["redirect_uri"], "http://localhost:1/callback");
    Ok(())
}

#[tokio::test]
async fn unauthorized_response_is_an_auth_error() -> anyhow::Result<()> {
    let router = Router::new()
        .route("/deployments/{id}/status", get(|| async { (StatusCode::UNAUTHORIZED, "token revoked") }));
    let server = MockServer::start(router).await?;
    let dir = tempfile::tempdir()?;
    let err = server.client(dir.path()).deployment_status("d").await.expect_err("401");
    assert_eq!(err.downcast_ref::<AuthError>(), Some(&AuthError::NotAuthenticated));
    assert!(format!("{err:#}").contains("token revoked"), "{err:#}");
    Ok(())
}

#[tokio::test]
async fn bucket_keys_and_objects() -> anyhow::Result<()> {
    let (server, _, dir) = start().await?;
    let api = server.client(dir.path());

    assert_eq!(api.list_bucket_keys("alpha", "assets").await?, ["logo.png", "css/site.css"]);
    assert_eq!(api.get_bucket_object("alpha", "assets", "css/site.css").await?, b"body{}");
    assert_eq!(
        api.get_bucket_object("alpha", "assets", "logo.png").await?,
        [0x89, b'P', b'N', b'G', 0x00, 0xff]
    );
    assert_eq!(api.get_bucket_object("alpha", "assets", "with space.txt").await?, b"spaced");
    Ok(())
}

#[tokio::test]
async fn missing_bucket_or_object_is_a_404() -> anyhow::Result<()> {
    let (server, _, dir) = start().await?;
    let api = server.client(dir.path());

    let err = api.list_bucket_keys("alpha", "nope").await.expect_err("404");
    assert_eq!(err.downcast_ref::<ApiError>().map(|e| e.status), Some(404));
    let err = api.get_bucket_object("alpha", "assets", "gone").await.expect_err("404");
    assert_eq!(err.downcast_ref::<ApiError>().map(|e| e.status), Some(404));
    Ok(())
}

#[tokio::test]
async fn bucket_calls_are_guarded() -> anyhow::Result<()> {
    let (server, _, dir) = start().await?;
    let api = server.logged_out_client(dir.path());
    let err = api.get_bucket_object("alpha", "assets", "logo.png").await.expect_err("not logged in");
    assert_eq!(err.downcast_ref::<AuthError>(), Some(&AuthError::NotAuthenticated));
    let err = api.list_bucket_keys("alpha", "assets").await.expect_err("not logged in");
    assert_eq!(err.downcast_ref::<AuthError>(), Some(&AuthError::NotAuthenticated));
    Ok(())
}
