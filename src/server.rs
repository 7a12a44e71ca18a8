// HTTP front for the job pipeline
//
// Exposes registration, status, job submission, premium billing, and the
// Prometheus /metrics endpoint.

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span};

use crate::billing::{self, Billing, CompletedPayment, Invoice, PaymentRejection};
use crate::logging::RequestId;
use crate::metrics;
use crate::pipeline::{AccountStatus, FailureKind, JobOutcome, JobPipeline};
use crate::store::{Entity, EntityId, EntityProfile, StoreError, Subscription};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<JobPipeline>,
    pub billing: Billing,
}

impl AppState {
    pub fn new(pipeline: Arc<JobPipeline>, billing: Billing) -> Self {
        Self { pipeline, billing }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Handler error mapped onto a JSON body
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Payment(#[from] PaymentRejection),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            ApiError::Store(StoreError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Store(e) => {
                error!("Store error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
            ApiError::Payment(PaymentRejection::InvalidPayload(_)) => {
                (StatusCode::BAD_REQUEST, "invalid_payload")
            }
            ApiError::Payment(PaymentRejection::EntityMismatch { .. }) => {
                (StatusCode::FORBIDDEN, "entity_mismatch")
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: error.to_string(),
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    pub entity_id: EntityId,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    #[serde(flatten)]
    pub outcome: JobOutcome,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidatePaymentRequest {
    pub entity_id: EntityId,
    pub payload: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidatePaymentResponse {
    pub ok: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/entities/{id}", post(register_handler))
        .route("/entities/{id}/status", get(status_handler))
        .route("/entities/{id}/invoice", get(invoice_handler))
        .route("/jobs", post(submit_handler))
        .route("/payments/validate", post(validate_payment_handler))
        .route("/payments", post(payment_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
            info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %RequestId::new(),
            )
        }))
        .with_state(state)
}

/// Serve until Ctrl-C, then close the pipeline to new work
pub async fn serve(bind: &str, state: AppState) -> Result<()> {
    metrics::init().context("Failed to initialize metrics")?;

    let pipeline = Arc::clone(&state.pipeline);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await
        .context("HTTP server error")?;

    pipeline.shutdown();
    Ok(())
}

async fn register_handler(
    State(state): State<AppState>,
    Path(id): Path<EntityId>,
    Json(profile): Json<EntityProfile>,
) -> Result<Json<Entity>, ApiError> {
    let entity = state.pipeline.tiers().register(id, &profile).await?;
    Ok(Json(entity))
}

async fn status_handler(
    State(state): State<AppState>,
    Path(id): Path<EntityId>,
) -> Result<Json<AccountStatus>, ApiError> {
    Ok(Json(state.pipeline.status(id).await?))
}

async fn invoice_handler(
    State(state): State<AppState>,
    Path(id): Path<EntityId>,
) -> Json<Invoice> {
    Json(state.billing.invoice(id))
}

async fn submit_handler(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> (StatusCode, Json<SubmitJobResponse>) {
    let outcome = state.pipeline.submit(request.entity_id, &request.text).await;
    let status = match &outcome {
        JobOutcome::Delivered { .. } => StatusCode::OK,
        JobOutcome::Busy => StatusCode::CONFLICT,
        JobOutcome::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        JobOutcome::InvalidResource => StatusCode::UNPROCESSABLE_ENTITY,
        JobOutcome::Failed {
            failure: FailureKind::Internal,
            ..
        } => StatusCode::INTERNAL_SERVER_ERROR,
        JobOutcome::Failed { .. } => StatusCode::BAD_GATEWAY,
    };
    let message = outcome.user_message();
    (status, Json(SubmitJobResponse { outcome, message }))
}

async fn validate_payment_handler(
    Json(request): Json<ValidatePaymentRequest>,
) -> Result<Json<ValidatePaymentResponse>, ApiError> {
    billing::validate_payload(&request.payload, request.entity_id)?;
    Ok(Json(ValidatePaymentResponse { ok: true }))
}

async fn payment_handler(
    State(state): State<AppState>,
    Json(payment): Json<CompletedPayment>,
) -> Result<(StatusCode, Json<Subscription>), ApiError> {
    let subscription = state.billing.complete(&payment).await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error gathering metrics: {}", e),
            )
                .into_response()
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}
