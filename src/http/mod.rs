use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::Method;
use axum::http::StatusCode;
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::intake::IntakeError;
use crate::state::AppState;

mod claims;

pub const SERVICE_NAME: &str = "soluna-backend";

pub fn router(state: AppState) -> Router {
    // The claim page is served from a different origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([ACCEPT, CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/", get(banner))
        .route("/health", get(health_live))
        .route("/health/ready", get(health_ready))
        .merge(claims::router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

async fn banner() -> Json<BannerResponse> {
    Json(BannerResponse {
        ok: true,
        service: SERVICE_NAME,
    })
}

async fn health_live(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = state.start_time.elapsed().as_secs();
    Json(HealthResponse {
        status: "live",
        uptime_seconds: uptime,
    })
}

/// Ready when the store answers. Chain reachability is reported but only the
/// worker depends on it.
async fn health_ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let store_reachable = match state.store.ping().await {
        Ok(()) => true,
        Err(err) => {
            warn!("Readiness: claim store unreachable: {err}");
            false
        }
    };
    let chain_reachable = state.chain.ping().await;

    let status = if store_reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let response = ReadyResponse {
        healthy: store_reachable,
        store_reachable,
        chain_reachable,
    };
    (status, Json(response))
}

#[derive(Debug, Serialize)]
struct BannerResponse {
    ok: bool,
    service: &'static str,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
struct ReadyResponse {
    healthy: bool,
    store_reachable: bool,
    chain_reachable: bool,
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    pub fn new(status: StatusCode, message: String) -> Self {
        assert!(status != StatusCode::OK, "Error status cannot be 200");
        assert!(!message.is_empty(), "Error message cannot be empty");
        Self { status, message }
    }
}

impl From<IntakeError> for HttpError {
    fn from(err: IntakeError) -> Self {
        let status = match &err {
            IntakeError::Validation(_) => StatusCode::BAD_REQUEST,
            IntakeError::DuplicateClaim { .. } => StatusCode::CONFLICT,
            IntakeError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match err {
            // Store internals stay in the logs
            IntakeError::Store(_) => "claim store unavailable".to_string(),
            other => other.to_string(),
        };
        Self::new(status, message)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        info!(status = self.status.as_u16(), "HTTP error: {}", self.message);
        let body = Json(ErrorBody {
            ok: false,
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    ok: bool,
    error: String,
}
