// ============================================================================
// Invocation Server
// ============================================================================
//
// HTTP surface of the chain. `POST /invoke` accepts one chain payload and
// runs its step in the background; the step's follow-up goes out through the
// scheduler's dispatcher, usually an `HttpDispatcher` pointing back here.
//
// ============================================================================

pub mod error;

pub use error::{ApiError, ErrorResponse};

use crate::chain::ChainScheduler;
use crate::core::{ChainPayload, KickoffPayload, Sequence};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{Instrument, debug, error, info_span};

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct ApiMessage {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct KickoffResponse {
    pub started: bool,
    pub first: Option<ChainPayload>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub remaining: Vec<u64>,
    pub resume_from: Option<u64>,
}

#[derive(Clone)]
pub struct ServerState {
    pub scheduler: ChainScheduler,
}

impl ServerState {
    pub fn new(scheduler: ChainScheduler) -> Self {
        Self { scheduler }
    }
}

pub fn build_router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(healthcheck))
        .route("/invoke", post(invoke))
        .route("/kickoff", post(kickoff))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthcheck() -> Json<ApiResponse<ApiMessage>> {
    Json(ApiResponse {
        data: ApiMessage {
            message: "ok".to_string(),
        },
    })
}

/// Accepts the payload once its cursor is valid; the step itself runs
/// after the response.
async fn invoke(
    State(state): State<ServerState>,
    Json(payload): Json<ChainPayload>,
) -> Result<(StatusCode, Json<ApiResponse<ChainPayload>>), ApiError> {
    let cursor = payload.cursor()?;
    debug!(cursor = %cursor, "invocation accepted");

    let scheduler = state.scheduler.clone();
    tokio::spawn(
        async move {
            match scheduler.invoke(payload).await {
                Ok(outcome) => debug!(state = %outcome.state, "invocation finished"),
                Err(err) => error!(
                    transaction = payload.transaction,
                    total = payload.total,
                    error = %err,
                    "invocation failed, chain halted"
                ),
            }
        }
        .instrument(info_span!("invoke_request")),
    );

    Ok((StatusCode::ACCEPTED, Json(ApiResponse { data: payload })))
}

async fn kickoff(
    State(state): State<ServerState>,
    Json(payload): Json<KickoffPayload>,
) -> Result<(StatusCode, Json<ApiResponse<KickoffResponse>>), ApiError> {
    let first = state.scheduler.kickoff(payload).await?;
    let status = if first.is_some() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(ApiResponse {
            data: KickoffResponse {
                started: first.is_some(),
                first,
            },
        }),
    ))
}

async fn status(
    State(state): State<ServerState>,
) -> Result<Json<ApiResponse<StatusResponse>>, ApiError> {
    let remaining = state.scheduler.store().list().await?;
    Ok(Json(ApiResponse {
        data: StatusResponse {
            resume_from: remaining.first().map(Sequence::get),
            remaining: remaining.into_iter().map(u64::from).collect(),
        },
    }))
}
