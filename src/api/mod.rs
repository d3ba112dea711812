use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::amount::AmountError;
use crate::executor::{ExecutionError, ExecutionStatus, Orchestrator};
use crate::models::CanonicalRecord;
use crate::normalize::{parse_and_normalize, NormalizeError};
use crate::preview::{build_preview, TxPreview};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct PreviewResponse {
    record: CanonicalRecord,
    preview: TxPreview,
}

#[derive(Serialize)]
struct ExecuteResponse {
    tx_hash: String,
    statuses: Vec<ExecutionStatus>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    statuses: Option<Vec<ExecutionStatus>>,
}

enum ApiError {
    Normalize(NormalizeError),
    Amount(AmountError),
    Execution {
        error: ExecutionError,
        statuses: Vec<ExecutionStatus>,
    },
    Internal(String),
}

impl From<NormalizeError> for ApiError {
    fn from(err: NormalizeError) -> Self {
        ApiError::Normalize(err)
    }
}

impl From<AmountError> for ApiError {
    fn from(err: AmountError) -> Self {
        ApiError::Amount(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Normalize(err) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: err.kind(),
                    message: err.to_string(),
                    statuses: None,
                },
            ),
            ApiError::Amount(err) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: "invalid_amount",
                    message: err.to_string(),
                    statuses: None,
                },
            ),
            ApiError::Execution { error, statuses } => {
                let status = match error {
                    ExecutionError::AlreadyInProgress => StatusCode::CONFLICT,
                    ExecutionError::WalletNotConnected => StatusCode::PRECONDITION_FAILED,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (
                    status,
                    ErrorBody {
                        error: error.kind(),
                        message: error.to_string(),
                        statuses: Some(statuses),
                    },
                )
            }
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    error: "internal",
                    message,
                    statuses: None,
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn preview(body: String) -> Result<Json<PreviewResponse>, ApiError> {
    let record = parse_and_normalize(&body)?;
    let preview = build_preview(&record)?;
    Ok(Json(PreviewResponse { record, preview }))
}

async fn execute(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let record = parse_and_normalize(&body)?;

    let mut events = state.orchestrator.subscribe();
    // The attempt runs on its own task so a dropped connection cannot cancel
    // it between wallet prompts.
    let orchestrator = state.orchestrator.clone();
    let attempt = tokio::spawn(async move { orchestrator.execute(&record).await });
    let outcome = attempt.await.map_err(|err| {
        tracing::error!("execution task ended abnormally: {}", err);
        ApiError::Internal(err.to_string())
    })?;
    match outcome {
        Ok(hash) => Ok(Json(ExecuteResponse {
            tx_hash: format!("{:?}", hash),
            statuses: drain(&mut events),
        })),
        // The running attempt owns the event stream; report nothing from it.
        Err(error @ ExecutionError::AlreadyInProgress) => Err(ApiError::Execution {
            error,
            statuses: Vec::new(),
        }),
        Err(error) => Err(ApiError::Execution {
            error,
            statuses: drain(&mut events),
        }),
    }
}

async fn status(State(state): State<AppState>) -> Json<ExecutionStatus> {
    Json(state.orchestrator.status())
}

fn drain(events: &mut broadcast::Receiver<ExecutionStatus>) -> Vec<ExecutionStatus> {
    let mut statuses = Vec::new();
    while let Ok(status) = events.try_recv() {
        statuses.push(status);
    }
    statuses
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/preview", post(preview))
        .route("/execute", post(execute))
        .route("/status", get(status))
        .with_state(state)
}

pub async fn run_http_server(addr: &str, state: AppState) -> Result<()> {
    let app = app_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
