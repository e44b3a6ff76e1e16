//! REST endpoints for the conversation pipeline.

use std::future::Future;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use uuid::Uuid;

use tokio::net::TcpListener;

use crate::error::{DatabaseError, PipelineError};
use crate::knowledge::{Document, Ingestor};
use crate::pipeline::{Orchestrator, TurnOutcome, UserQuery};
use crate::profile::{ANONYMOUS_USER_ID, UserProfile};
use crate::store::ProfileStore;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub ingestor: Arc<Ingestor>,
    pub profiles: Arc<dyn ProfileStore>,
}

/// Build the Axum router with all REST routes.
pub fn api_routes(
    orchestrator: Arc<Orchestrator>,
    ingestor: Arc<Ingestor>,
    profiles: Arc<dyn ProfileStore>,
) -> Router {
    let state = AppState {
        orchestrator,
        ingestor,
        profiles,
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/turn", post(handle_turn))
        .route("/api/sessions/{id}", get(get_session))
        .route("/api/profiles/{id}", get(get_profile).put(put_profile))
        .route("/api/resources", get(list_resources))
        .route("/api/knowledge", post(ingest_knowledge))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve `app` until `shutdown` resolves, then drain open connections.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "care-assist"
    }))
}

// ── Turns ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TurnRequest {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    text: String,
}

impl TurnRequest {
    fn into_query(self) -> UserQuery {
        let session_id = self
            .session_id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let user_id = self
            .user_id
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| ANONYMOUS_USER_ID.to_string());
        UserQuery::new(session_id, user_id, self.text)
    }
}

#[derive(Serialize)]
struct TurnResponse {
    session_id: String,
    #[serde(flatten)]
    outcome: TurnOutcome,
}

async fn handle_turn(State(state): State<AppState>, Json(body): Json<TurnRequest>) -> impl IntoResponse {
    let query = body.into_query();
    match state
        .orchestrator
        .handle_turn(&query.session_id, &query.user_id, &query.text)
        .await
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(serde_json::json!(TurnResponse {
                session_id: query.session_id,
                outcome,
            })),
        ),
        Err(PipelineError::EmptyInput) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Message text is empty"})),
        ),
        Err(e) => {
            error!(session_id = %query.session_id, error = %e, "Turn failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            )
        }
    }
}

// ── Sessions ────────────────────────────────────────────────────────────

async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.orchestrator.session_snapshot(&id).await {
        Ok(Some(snapshot)) => (StatusCode::OK, Json(serde_json::json!(snapshot))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Session not found"})),
        ),
        Err(e) => {
            error!(session_id = %id, error = %e, "Session lookup failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": e.to_string()})),
            )
        }
    }
}

// ── Profiles ────────────────────────────────────────────────────────────

async fn get_profile(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.profiles.get_profile(&id).await {
        Ok(profile) => (StatusCode::OK, Json(serde_json::json!(profile))),
        Err(DatabaseError::NotFound { .. }) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Profile not found"})),
        ),
        Err(e) => {
            error!(user_id = %id, error = %e, "Profile lookup failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": e.to_string()})),
            )
        }
    }
}

/// Profile fields as sent by a client; the path supplies the id.
#[derive(Deserialize)]
struct ProfileRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    age: Option<u32>,
    #[serde(default)]
    gender: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    profession: Option<String>,
    #[serde(default)]
    marital_status: Option<String>,
    #[serde(default)]
    prior_diagnoses: Vec<String>,
    #[serde(default)]
    ethnicity: Option<String>,
}

impl ProfileRequest {
    fn into_profile(self, id: String) -> UserProfile {
        UserProfile {
            id,
            name: self.name,
            age: self.age,
            gender: self.gender,
            region: self
                .region
                .map(|r| r.trim().to_lowercase())
                .filter(|r| !r.is_empty()),
            profession: self.profession,
            marital_status: self.marital_status,
            prior_diagnoses: self.prior_diagnoses,
            ethnicity: self.ethnicity,
        }
    }
}

async fn put_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ProfileRequest>,
) -> impl IntoResponse {
    let id = id.trim().to_string();
    if id.is_empty() || id == ANONYMOUS_USER_ID {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "A named user id is required"})),
        );
    }
    let profile = body.into_profile(id);
    match state.profiles.upsert_profile(&profile).await {
        Ok(()) => {
            info!(user_id = %profile.id, "Profile stored");
            (StatusCode::OK, Json(serde_json::json!(profile)))
        }
        Err(e) => {
            error!(user_id = %profile.id, error = %e, "Profile update failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": e.to_string()})),
            )
        }
    }
}

// ── Resources ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ResourceQuery {
    region: Option<String>,
}

async fn list_resources(State(state): State<AppState>, Query(query): Query<ResourceQuery>) -> impl IntoResponse {
    let helplines = state
        .orchestrator
        .directory()
        .helplines(query.region.as_deref());
    Json(helplines)
}

// ── Knowledge ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct IngestRequest {
    documents: Vec<Document>,
}

async fn ingest_knowledge(State(state): State<AppState>, Json(body): Json<IngestRequest>) -> impl IntoResponse {
    let documents = body.documents.len();
    match state.ingestor.ingest(body.documents).await {
        Ok(passages) => {
            info!(documents, passages, "Knowledge ingested over HTTP");
            (
                StatusCode::OK,
                Json(serde_json::json!({"documents": documents, "passages": passages})),
            )
        }
        Err(e) => {
            error!(error = %e, "Knowledge ingestion failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            )
        }
    }
}
