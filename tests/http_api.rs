// HTTP front against an in-memory SQLite ledger

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use jobgate::billing::Billing;
use jobgate::config::QuotaConfig;
use jobgate::pipeline::{
    Artifact, DeliveryError, DeliveryTransport, FetchError, Fetcher, JobPipeline, JobRequest,
    PipelineSettings,
};
use jobgate::server::{router, AppState};
use jobgate::store::SqliteLedger;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;

struct TinyFetcher;

impl Fetcher for TinyFetcher {
    fn fetch(&self, _url: &str, destination: &Path) -> Result<Artifact, FetchError> {
        std::fs::write(destination, b"clip").map_err(|e| FetchError::Unknown(e.to_string()))?;
        Ok(Artifact {
            path: destination.to_path_buf(),
            size_bytes: 4,
        })
    }
}

struct Accept;

#[async_trait]
impl DeliveryTransport for Accept {
    async fn deliver(&self, _request: &JobRequest, _artifact: &Artifact) -> Result<(), DeliveryError> {
        Ok(())
    }
}

async fn app(work_dir: &Path) -> Router {
    let ledger = SqliteLedger::in_memory().await.unwrap();
    let pipeline = Arc::new(JobPipeline::new(
        PipelineSettings {
            daily_free_limit: 1,
            work_dir: work_dir.to_path_buf(),
            ..PipelineSettings::default()
        },
        Arc::new(ledger),
        Arc::new(TinyFetcher),
        Arc::new(Accept),
    ));
    let billing = Billing::new(pipeline.tiers().clone(), QuotaConfig::default());
    router(AppState::new(pipeline, billing))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_register_updates_profile() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path()).await;

    let (status, body) = call(&app, "POST", "/entities/8", Some(json!({"username": "ana"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["profile"]["username"], "ana");
    assert_eq!(body["tier"], "free");

    let (_, body) = call(&app, "POST", "/entities/8", Some(json!({"username": "ana_b"}))).await;
    assert_eq!(body["profile"]["username"], "ana_b");
}

#[tokio::test]
async fn test_quota_then_payment_unlocks_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path()).await;
    let job = json!({"entity_id": 5, "text": "https://x.com/a/status/1"});

    let (status, body) = call(&app, "POST", "/jobs", Some(job.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "delivered");
    assert_eq!(body["premium"], false);

    let (status, body) = call(&app, "POST", "/jobs", Some(job.clone())).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["outcome"], "quota_exceeded");

    let (status, _) = call(
        &app,
        "POST",
        "/payments/validate",
        Some(json!({"entity_id": 5, "payload": "premium_5"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &app,
        "POST",
        "/payments",
        Some(json!({"entity_id": 5, "payment_ref": "charge_5", "amount": 250})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["payment_ref"], "charge_5");

    let (status, body) = call(&app, "POST", "/jobs", Some(job)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["premium"], true);

    let (_, body) = call(&app, "GET", "/entities/5/status", None).await;
    assert_eq!(body["tier"], "premium");
    assert_eq!(body["used_today"], 2);
    assert_eq!(body["remaining"], Value::Null);
}

#[tokio::test]
async fn test_bad_payload_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path()).await;

    let (status, body) = call(
        &app,
        "POST",
        "/payments/validate",
        Some(json!({"entity_id": 5, "payload": "gift_5"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_payload");
}
