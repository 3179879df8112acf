//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        CapturePayload, CaptureResponse, DialogueAudioResponse, ErrorResponse, SessionView,
        StartSessionPayload, StoredAssessment, SubmitSectionPayload,
    },
    state::AppState,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::create_session,
        handlers::get_session,
        handlers::delete_session,
        handlers::start_session,
        handlers::submit_section,
        handlers::restart_session,
        handlers::dialogue_audio,
        handlers::begin_capture,
        handlers::end_capture,
        handlers::list_assessments,
    ),
    components(
        schemas(SessionView, StartSessionPayload, SubmitSectionPayload, DialogueAudioResponse, CapturePayload, CaptureResponse, StoredAssessment, ErrorResponse)
    ),
    tags(
        (name = "Hermes API", description = "Adaptive language assessment sessions")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/sessions", post(handlers::create_session))
        .route(
            "/sessions/{id}",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/sessions/{id}/start", post(handlers::start_session))
        .route("/sessions/{id}/sections", post(handlers::submit_section))
        .route("/sessions/{id}/restart", post(handlers::restart_session))
        .route(
            "/sessions/{id}/dialogue-audio",
            post(handlers::dialogue_audio),
        )
        .route(
            "/sessions/{id}/capture",
            post(handlers::begin_capture).delete(handlers::end_capture),
        )
        .route("/assessments", get(handlers::list_assessments))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
