//! Axum Handlers for the REST API
//!
//! Thin adapters between HTTP and the assessment session. Every policy
//! decision lives in the session; handlers only resolve the caller, find the
//! session and translate errors into status codes.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use hermes_core::audio::encode_base64_audio;
use hermes_core::error::AssessmentError;
use hermes_core::store::Identity;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    models::{
        CapturePayload, CaptureResponse, DialogueAudioResponse, ErrorResponse, SessionView,
        StartSessionPayload, StoredAssessment, SubmitSectionPayload,
    },
    state::{AppState, SessionEntry},
};

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    BadGateway(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, message),
            ApiError::BadGateway(message) => {
                warn!("Provider failure: {}", message);
                (StatusCode::BAD_GATEWAY, message)
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred.".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { message })).into_response()
    }
}

impl From<AssessmentError> for ApiError {
    fn from(err: AssessmentError) -> Self {
        match err {
            AssessmentError::InvalidTransition { .. } => ApiError::BadRequest(err.to_string()),
            AssessmentError::Auth(_) => ApiError::Unauthorized(err.to_string()),
            AssessmentError::CaptureBusy => ApiError::Conflict(err.to_string()),
            AssessmentError::MalformedResponse { .. }
            | AssessmentError::Generation { .. }
            | AssessmentError::Scoring { .. }
            | AssessmentError::AudioSynthesis(_)
            | AssessmentError::ReportSynthesis(_) => ApiError::BadGateway(err.to_string()),
            AssessmentError::Persistence(_) => ApiError::InternalServerError(err.into()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalServerError(err)
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Resolves the caller from the identity headers.
pub fn identity_from_headers(headers: &HeaderMap) -> Result<Identity, ApiError> {
    let id = header_value(headers, "x-user-id")
        .ok_or_else(|| ApiError::Unauthorized("x-user-id header is required".to_string()))?;
    Ok(Identity {
        id,
        name: header_value(headers, "x-user-name"),
        email: header_value(headers, "x-user-email"),
    })
}

async fn owned_session(
    state: &AppState,
    headers: &HeaderMap,
    id: Uuid,
) -> Result<Arc<SessionEntry>, ApiError> {
    let identity = identity_from_headers(headers)?;
    let entry = state
        .session_for(id, &identity.id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Session with id '{}' not found", id)))?;
    entry.touch();
    Ok(entry)
}

/// Create a new assessment session for the caller.
#[utoipa::path(
    post,
    path = "/sessions",
    responses(
        (status = 201, description = "Session created and awaiting start", body = SessionView),
        (status = 401, description = "Missing identity", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = String, Header, description = "The ID of the signed-in user"),
        ("x-user-name" = Option<String>, Header, description = "Display name of the user"),
        ("x-user-email" = Option<String>, Header, description = "Email of the user")
    )
)]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers)?;
    let entry = state.create_session(identity).await?;
    info!(session_id = %entry.id, user_id = %entry.owner, "Created assessment session");
    Ok((StatusCode::CREATED, Json(entry.view().await)))
}

/// Get a session's current view.
///
/// While a section is loading or being graded, the view carries the live
/// state over the last completed snapshot.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    responses(
        (status = 200, description = "Session details", body = SessionView),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    let entry = owned_session(&state, &headers, id).await?;
    Ok(Json(entry.view().await))
}

/// Discard a session and release everything it holds.
#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    responses(
        (status = 204, description = "Session removed"),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let identity = identity_from_headers(&headers)?;
    if state.remove_session(id, &identity.id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Session with id '{}' not found", id)))
    }
}

/// Start the assessment at a target level and load the first section.
#[utoipa::path(
    post,
    path = "/sessions/{id}/start",
    request_body = StartSessionPayload,
    responses(
        (status = 200, description = "First section is active", body = SessionView),
        (status = 400, description = "Session cannot start now", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 502, description = "Content provider failed", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn start_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<StartSessionPayload>,
) -> Result<Json<SessionView>, ApiError> {
    let entry = owned_session(&state, &headers, id).await?;
    let mut session = entry.session.lock().await;
    session.start(payload.level).await?;
    Ok(Json(entry.publish(&session).await))
}

/// Submit the answers of the active section.
#[utoipa::path(
    post,
    path = "/sessions/{id}/sections",
    request_body = SubmitSectionPayload,
    responses(
        (status = 200, description = "Next section or report", body = SessionView),
        (status = 400, description = "No section is active", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 502, description = "Provider failed", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn submit_section(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<SubmitSectionPayload>,
) -> Result<Json<SessionView>, ApiError> {
    let entry = owned_session(&state, &headers, id).await?;
    let mut session = entry.session.lock().await;
    session.submit_section(payload.answers).await?;
    Ok(Json(entry.publish(&session).await))
}

/// Return a finished or failed session to the start screen.
#[utoipa::path(
    post,
    path = "/sessions/{id}/restart",
    responses(
        (status = 200, description = "Session awaiting start", body = SessionView),
        (status = 400, description = "Session is still in progress", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn restart_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    let entry = owned_session(&state, &headers, id).await?;
    let mut session = entry.session.lock().await;
    session.restart().await?;
    Ok(Json(entry.publish(&session).await))
}

/// Synthesize the active listening dialogue.
#[utoipa::path(
    post,
    path = "/sessions/{id}/dialogue-audio",
    responses(
        (status = 200, description = "PCM16 dialogue audio", body = DialogueAudioResponse),
        (status = 400, description = "No listening section is active", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 502, description = "Speech provider failed", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn dialogue_audio(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<DialogueAudioResponse>, ApiError> {
    let entry = owned_session(&state, &headers, id).await?;
    let playback = entry.session.lock().await.play_dialogue().await?;
    Ok(Json(DialogueAudioResponse {
        audio_base64: encode_base64_audio(&playback.pcm),
        sample_rate: playback.context.sample_rate,
        channels: playback.context.channels,
        duration_secs: playback.buffer.duration().as_secs_f64(),
    }))
}

/// Open the exclusive capture stream for a speaking answer.
#[utoipa::path(
    post,
    path = "/sessions/{id}/capture",
    request_body = CapturePayload,
    responses(
        (status = 201, description = "Capture started", body = CaptureResponse),
        (status = 400, description = "No speaking section is active", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "A capture is already active", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn begin_capture(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    payload: Option<Json<CapturePayload>>,
) -> Result<impl IntoResponse, ApiError> {
    let entry = owned_session(&state, &headers, id).await?;
    let media_type = payload.and_then(|Json(p)| p.media_type);
    let stream = entry.session.lock().await.begin_capture(media_type)?;
    Ok((StatusCode::CREATED, Json(CaptureResponse::from(stream))))
}

/// Release the capture stream.
#[utoipa::path(
    delete,
    path = "/sessions/{id}/capture",
    responses(
        (status = 204, description = "Capture released"),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn end_capture(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let entry = owned_session(&state, &headers, id).await?;
    entry.session.lock().await.end_capture();
    Ok(StatusCode::NO_CONTENT)
}

/// List the caller's stored assessments, most recent first.
#[utoipa::path(
    get,
    path = "/assessments",
    responses(
        (status = 200, description = "Stored assessments", body = [StoredAssessment]),
        (status = 401, description = "Missing identity", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn list_assessments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<StoredAssessment>>, ApiError> {
    let identity = identity_from_headers(&headers)?;
    let records = state.services.store.list_assessments(&identity.id).await?;
    Ok(Json(records.into_iter().map(StoredAssessment::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use hermes_core::model::Skill;

    #[test]
    fn test_identity_from_headers() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            identity_from_headers(&headers),
            Err(ApiError::Unauthorized(_))
        ));

        headers.insert("x-user-id", HeaderValue::from_static("user-1"));
        headers.insert("x-user-email", HeaderValue::from_static("ana@example.com"));
        headers.insert("x-user-name", HeaderValue::from_static("  "));
        let identity = identity_from_headers(&headers).unwrap();
        assert_eq!(identity.id, "user-1");
        assert_eq!(identity.name, None);
        assert_eq!(identity.display_name(), "ana");
    }

    #[test]
    fn test_assessment_errors_map_to_status_codes() {
        let cases = [
            (
                AssessmentError::InvalidTransition {
                    operation: "start",
                    state: "failed".into(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (AssessmentError::Auth("x".into()), StatusCode::UNAUTHORIZED),
            (AssessmentError::CaptureBusy, StatusCode::CONFLICT),
            (
                AssessmentError::Scoring {
                    skill: Skill::Writing,
                    reason: "x".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                AssessmentError::AudioSynthesis("x".into()),
                StatusCode::BAD_GATEWAY,
            ),
            (
                AssessmentError::Persistence("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }
}
