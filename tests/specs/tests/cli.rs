// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end tests that spawn the real `neptune` binary against a mock
//! platform API.

use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde_json::{json, Value};

use neptune_specs::{MockApi, Neptune};

const APP_JSON: &str = r#"{"name":"app","kind":"Service"}"#;

fn authorized(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {token}"))
}

/// A platform whose deployment `dep-1` always reports `status` and which
/// only accepts `Bearer good`.
fn platform(status: &'static str) -> Router {
    Router::new()
        .route(
            "/deployments/{id}/status",
            get(move |headers: HeaderMap| async move {
                if !authorized(&headers, "good") {
                    return Err(StatusCode::UNAUTHORIZED);
                }
                Ok(Json(json!({ "status": status })))
            }),
        )
        .route(
            "/deployments/{id}/logs",
            get(|| async { Json(json!({ "logs": ["boot", "panic: port in use"] })) }),
        )
        .route(
            "/project",
            get(|| async {
                Json(json!({ "projects": [
                    { "name": "app", "provisioning_state": "Ready",
                      "running_status": { "public_ip": "203.0.113.9" } },
                    { "name": "worker", "provisioning_state": "Provisioning" },
                ]}))
            }),
        )
}

// -- exit codes ---------------------------------------------------------------

#[tokio::test]
async fn usage_error_exits_2() -> anyhow::Result<()> {
    let out = Neptune::new()?.run(&["wait"]).await?;
    assert_eq!(out.code, 2, "{out:?}");
    Ok(())
}

#[tokio::test]
async fn whoami_logged_out_exits_3() -> anyhow::Result<()> {
    let out = Neptune::new()?.run(&["whoami"]).await?;
    assert_eq!(out.code, 3, "{out:?}");
    assert!(out.stderr.contains("neptune login"), "{out:?}");
    Ok(())
}

#[tokio::test]
async fn whoami_never_prints_the_token() -> anyhow::Result<()> {
    let neptune = Neptune::new()?.logged_in("very-secret-token", 3600)?;
    let out = neptune.run(&["whoami"]).await?;
    assert_eq!(out.code, 0, "{out:?}");
    assert!(out.stdout.contains("session token"), "{out:?}");
    assert!(!out.stdout.contains("very-secret-token"));
    assert!(!out.stderr.contains("very-secret-token"));
    Ok(())
}

#[tokio::test]
async fn logout_then_whoami_is_unauthenticated() -> anyhow::Result<()> {
    let neptune = Neptune::new()?.logged_in("good", 3600)?;
    assert_eq!(neptune.run(&["logout"]).await?.code, 0);
    assert!(neptune.store().load().is_none());
    assert_eq!(neptune.run(&["whoami"]).await?.code, 3);
    Ok(())
}

// -- deployment monitor -------------------------------------------------------

#[tokio::test]
async fn wait_running_exits_0() -> anyhow::Result<()> {
    let api = MockApi::start(platform("Running")).await?;
    let neptune = Neptune::new()?.api(&api.url).logged_in("good", 3600)?;

    let out = neptune.run(&["wait", "dep-1", "--poll-interval", "1", "--max-wait", "20"]).await?;
    assert_eq!(out.code, 0, "{out:?}");
    assert!(out.stdout.contains("[1] Running"), "{out:?}");
    assert!(out.stdout.contains("Deployment dep-1 is Running."), "{out:?}");
    Ok(())
}

#[tokio::test]
async fn wait_stopped_prints_logs_and_exits_1() -> anyhow::Result<()> {
    let api = MockApi::start(platform("Stopped")).await?;
    let neptune = Neptune::new()?.api(&api.url).logged_in("good", 3600)?;

    let out = neptune.run(&["wait", "dep-1", "--poll-interval", "1", "--max-wait", "20"]).await?;
    assert_eq!(out.code, 1, "{out:?}");
    assert!(out.stdout.contains("panic: port in use"), "{out:?}");
    Ok(())
}

#[tokio::test]
async fn wait_timeout_is_inconclusive_exit_4() -> anyhow::Result<()> {
    let api = MockApi::start(platform("Pending")).await?;
    let neptune = Neptune::new()?.api(&api.url).logged_in("good", 3600)?;

    let out = neptune.run(&["wait", "dep-1", "--poll-interval", "1", "--max-wait", "2"]).await?;
    assert_eq!(out.code, 4, "{out:?}");
    assert!(out.stderr.contains("inconclusive"), "{out:?}");
    Ok(())
}

#[tokio::test]
async fn wait_with_expired_session_makes_no_call() -> anyhow::Result<()> {
    let api = MockApi::start(platform("Running")).await?;
    let neptune = Neptune::new()?.api(&api.url).logged_in("good", -10)?;

    let out = neptune.run(&["wait", "dep-1", "--poll-interval", "1"]).await?;
    assert_eq!(out.code, 3, "{out:?}");
    assert!(out.stderr.contains("expired"), "{out:?}");
    Ok(())
}

#[tokio::test]
async fn rejected_token_exits_3() -> anyhow::Result<()> {
    let api = MockApi::start(platform("Running")).await?;
    let neptune = Neptune::new()?.api(&api.url).logged_in("revoked", 3600)?;

    let out = neptune.run(&["wait", "dep-1", "--poll-interval", "1"]).await?;
    assert_eq!(out.code, 3, "{out:?}");
    Ok(())
}

// -- project commands ---------------------------------------------------------

#[tokio::test]
async fn projects_uses_api_key_and_prints_table() -> anyhow::Result<()> {
    let api = MockApi::start(platform("Running")).await?;
    let neptune = Neptune::new()?.api(&api.url).api_key("key-123");

    let out = neptune.run(&["projects"]).await?;
    assert_eq!(out.code, 0, "{out:?}");
    let lines: Vec<&str> = out.stdout.lines().collect();
    assert!(lines[0].starts_with("NAME"), "{out:?}");
    assert!(out.stdout.contains("http://203.0.113.9"), "{out:?}");
    assert!(out.stdout.contains("worker"), "{out:?}");
    Ok(())
}

#[tokio::test]
async fn secret_is_read_from_stdin() -> anyhow::Result<()> {
    let seen = Arc::new(Mutex::new(None::<Value>));
    let router = Router::new()
        .route(
            "/project/{name}/secret",
            put(|State(seen): State<Arc<Mutex<Option<Value>>>>, Json(body): Json<Value>| async move {
                if let Ok(mut s) = seen.lock() {
                    *s = Some(body);
                }
                StatusCode::OK
            }),
        )
        .with_state(Arc::clone(&seen));
    let api = MockApi::start(router).await?;
    let neptune = Neptune::new()?.api(&api.url).api_key("key-123").project(APP_JSON)?;

    let out = neptune.run_with_stdin(&["secret", "DB_PASSWORD"], "hunter2\n").await?;
    assert_eq!(out.code, 0, "{out:?}");
    let body = seen.lock().map(|s| s.clone()).unwrap_or_default();
    assert_eq!(body, Some(json!({ "secret_name": "DB_PASSWORD", "secret_string": "hunter2" })));
    Ok(())
}

#[tokio::test]
async fn provision_without_neptune_json_fails() -> anyhow::Result<()> {
    let out = Neptune::new()?.api_key("key-123").run(&["provision"]).await?;
    assert_eq!(out.code, 1, "{out:?}");
    assert!(out.stderr.contains("neptune.json not found"), "{out:?}");
    Ok(())
}

// -- buckets ------------------------------------------------------------------

fn buckets() -> Router {
    Router::new()
        .route(
            "/project/{name}/bucket/{bucket}",
            get(|| async { Json(json!({ "keys": ["data/blob.bin", "readme.txt"] })) }),
        )
        .route(
            "/project/{name}/bucket/{bucket}/object/{*key}",
            get(|headers: HeaderMap| async move {
                if !authorized(&headers, "key-123") {
                    return Err(StatusCode::UNAUTHORIZED);
                }
                Ok(b"object bytes".to_vec())
            }),
        )
}

#[tokio::test]
async fn bucket_ls_prints_one_key_per_line() -> anyhow::Result<()> {
    let api = MockApi::start(buckets()).await?;
    let neptune = Neptune::new()?.api(&api.url).api_key("key-123").project(APP_JSON)?;

    let out = neptune.run(&["bucket", "ls", "assets"]).await?;
    assert_eq!(out.code, 0, "{out:?}");
    assert_eq!(out.stdout.lines().collect::<Vec<_>>(), ["data/blob.bin", "readme.txt"]);
    Ok(())
}

#[tokio::test]
async fn bucket_get_writes_stdout_or_file() -> anyhow::Result<()> {
    let api = MockApi::start(buckets()).await?;
    let neptune = Neptune::new()?.api(&api.url).api_key("key-123").project(APP_JSON)?;

    let out = neptune.run(&["bucket", "get", "assets", "data/blob.bin"]).await?;
    assert_eq!(out.code, 0, "{out:?}");
    assert_eq!(out.stdout, "object bytes");

    let out = neptune.run(&["bucket", "get", "assets", "data/blob.bin", "-o", "blob.bin"]).await?;
    assert_eq!(out.code, 0, "{out:?}");
    assert_eq!(std::fs::read(neptune.project_path().join("blob.bin"))?, b"object bytes");
    Ok(())
}

#[tokio::test]
async fn bucket_without_credentials_exits_3() -> anyhow::Result<()> {
    let api = MockApi::start(buckets()).await?;
    let neptune = Neptune::new()?.api(&api.url).project(APP_JSON)?;
    let out = neptune.run(&["bucket", "ls", "assets"]).await?;
    assert_eq!(out.code, 3, "{out:?}");
    Ok(())
}
