//! Claim intake endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::models::claim::{ClaimRequest, ClaimResponse};
use crate::state::AppState;

use super::HttpError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/claim", post(submit_claim))
        .route("/claim/{wallet}", get(get_claim))
}

/// Registers a claim; the worker pays it later.
async fn submit_claim(
    State(state): State<AppState>,
    payload: Result<Json<ClaimRequest>, JsonRejection>,
) -> Result<Json<ClaimResponse>, HttpError> {
    let Json(request) = payload
        .map_err(|rejection| HttpError::new(StatusCode::BAD_REQUEST, rejection.body_text()))?;
    let claim = state.intake.register(&request).await?;
    Ok(Json(ClaimResponse {
        ok: true,
        claim: claim.into(),
    }))
}

async fn get_claim(
    State(state): State<AppState>,
    Path(wallet): Path<String>,
) -> Result<Json<ClaimResponse>, HttpError> {
    let claim = state.intake.lookup(&wallet).await?.ok_or_else(|| {
        HttpError::new(
            StatusCode::NOT_FOUND,
            format!("no claim for wallet {wallet}"),
        )
    })?;
    Ok(Json(ClaimResponse {
        ok: true,
        claim: claim.into(),
    }))
}
