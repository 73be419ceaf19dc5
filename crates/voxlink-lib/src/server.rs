//! HTTP control API for a running [`VoiceSession`].
//!
//! Stands in for the start/stop/mute buttons of a voice chat page. CORS is
//! permissive so a local web page can drive it.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use voxlink_core::error::CaptureError;
use voxlink_core::types::{CaptureOutcome, SessionStatus};

use crate::session::VoiceSession;

pub fn router(session: VoiceSession) -> Router {
    Router::new()
        .route("/capture/start", post(capture_start))
        .route("/capture/stop", post(capture_stop))
        .route("/mute", post(mute))
        .route("/status", get(status))
        .layer(CorsLayer::permissive())
        .with_state(session)
}

#[derive(Serialize)]
struct CaptureResponse {
    ok: bool,
    outcome: CaptureOutcome,
}

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
}

#[derive(Serialize)]
struct MuteResponse {
    ok: bool,
    muted: bool,
}

#[derive(Serialize)]
struct ErrorBody {
    ok: bool,
    error: String,
}

/// Capture requests that conflict with the current capture state.
struct Conflict(CaptureError);

impl IntoResponse for Conflict {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            ok: false,
            error: self.0.to_string(),
        };
        (StatusCode::CONFLICT, Json(body)).into_response()
    }
}

/// Runs one full capture cycle and answers with its outcome.
async fn capture_start(
    State(session): State<VoiceSession>,
) -> Result<Json<CaptureResponse>, Conflict> {
    let outcome = session.start_capture().await.map_err(Conflict)?;
    Ok(Json(CaptureResponse { ok: true, outcome }))
}

async fn capture_stop(State(session): State<VoiceSession>) -> Result<Json<OkResponse>, Conflict> {
    session.stop_capture().map_err(Conflict)?;
    Ok(Json(OkResponse { ok: true }))
}

async fn mute(State(session): State<VoiceSession>) -> Json<MuteResponse> {
    let state = session.toggle_mute();
    Json(MuteResponse {
        ok: true,
        muted: state.is_muted(),
    })
}

async fn status(State(session): State<VoiceSession>) -> Json<SessionStatus> {
    Json(session.status())
}
