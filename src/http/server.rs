use std::future::Future;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::cloud::client::{PropertyPublisher, PublishError};

use super::{ControlRequest, ControlResponse, ErrorResponse, HealthResponse};

#[derive(Clone)]
pub struct AppState {
    pub publisher: Arc<PropertyPublisher>,
}

impl AppState {
    pub fn new(publisher: PropertyPublisher) -> Self {
        Self {
            publisher: Arc::new(publisher),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/controlDoor", post(control_door))
        .route("/health", get(health))
        // Browser control pages live on other origins
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the control API on an already bound listener until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = router(state);
    info!("HTTP server listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Failure of a `/controlDoor` request, rendered as a JSON error body.
pub enum ControlError {
    BadRequest(String),
    Publish(PublishError),
}

impl From<PublishError> for ControlError {
    fn from(err: PublishError) -> Self {
        ControlError::Publish(err)
    }
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ControlError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ControlError::Publish(err) => {
                // Upstream bodies and transport details stay in the logs
                match err {
                    PublishError::InvalidValue(_) => {
                        (StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
                    }
                    PublishError::NotAuthenticated => {
                        (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
                    }
                    PublishError::Transport(_) => (
                        StatusCode::BAD_GATEWAY,
                        "could not reach the cloud API".to_string(),
                    ),
                    PublishError::Status { status, .. } => (
                        StatusCode::BAD_GATEWAY,
                        format!("cloud API rejected the update with status {}", status.as_u16()),
                    ),
                }
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Handle `/controlDoor` requests
///
/// The body is parsed regardless of content type.
async fn control_door(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ControlResponse>, ControlError> {
    let request: ControlRequest = serde_json::from_slice(&body).map_err(|e| {
        warn!("Rejected control request: {}", e);
        ControlError::BadRequest(format!("invalid request body: {e}"))
    })?;

    info!("Received door status '{}'", request.door_status);

    if let Err(e) = state.publisher.publish(&request.door_status).await {
        error!("Failed to publish door status '{}': {}", request.door_status, e);
        return Err(e.into());
    }

    Ok(Json(ControlResponse {
        status: request.door_status,
    }))
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    if state.publisher.is_ready() {
        (StatusCode::OK, Json(HealthResponse { state: "ready" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                state: "unauthenticated",
            }),
        )
    }
}
