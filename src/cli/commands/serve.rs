//! HTTP API server for integration with other systems.
//!
//! Search submission is fire-and-forget: POST /search acknowledges with the
//! search id while the pipeline runs in the background. Clients follow
//! progress over the search channel (token from POST /search/token) or by
//! polling GET /search/status.

use crate::channel::{SubscribeToken, Topic};
use crate::cli::Output;
use crate::config::Settings;
use crate::job_store::JobStatus;
use crate::orchestrator::{Orchestrator, SearchRequest};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;
use uuid::Uuid;

/// How often finished search channels are checked for reclamation.
const CHANNEL_SWEEP_INTERVAL_SECONDS: u64 = 60;

/// Shared application state.
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

/// Run the HTTP API server.
pub async fn run_serve(host: &str, port: u16, settings: Settings) -> anyhow::Result<()> {
    let orchestrator = Arc::new(Orchestrator::new(settings)?);

    let sweeper = orchestrator
        .broker()
        .spawn_sweeper(std::time::Duration::from_secs(CHANNEL_SWEEP_INTERVAL_SECONDS));

    let state = Arc::new(AppState { orchestrator });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/search", post(submit_search))
        .route("/search/token", post(issue_token))
        .route("/search/status", get(search_status))
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    Output::header("Klipp API Server");
    println!();
    Output::success(&format!("Listening on http://{}", addr));
    println!();
    println!("Endpoints:");
    Output::kv("Health", "GET  /health");
    Output::kv("Submit Search", "POST /search");
    Output::kv("Subscribe Token", "POST /search/token");
    Output::kv("Job Status", "GET  /search/status?job_id=<uuid>");
    println!();
    Output::info("Press Ctrl+C to stop the server.");

    axum::serve(listener, app).await?;

    sweeper.abort();
    Ok(())
}

// === Request/Response Types ===

#[derive(Deserialize)]
struct SubmitRequest {
    query: String,
    /// Pre-generated by clients that subscribe before submitting; assigned
    /// by the server when omitted.
    #[serde(default)]
    search_id: Option<Uuid>,
}

#[derive(Serialize)]
struct SubmitResponse {
    search_id: Uuid,
    job_id: Uuid,
    status: &'static str,
}

#[derive(Deserialize)]
struct TokenRequest {
    search_id: Uuid,
    /// Topics to scope the token to; all three when omitted.
    #[serde(default)]
    topics: Option<Vec<Topic>>,
}

#[derive(Serialize)]
struct TokenResponse {
    #[serde(flatten)]
    token: SubscribeToken,
}

#[derive(Deserialize)]
struct StatusQuery {
    job_id: Uuid,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// === Handlers ===

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn submit_search(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitRequest>,
) -> impl IntoResponse {
    if req.query.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Search query must not be blank".to_string(),
            }),
        )
            .into_response();
    }

    let request = match req.search_id {
        Some(id) => SearchRequest::with_id(id, req.query),
        None => SearchRequest::new(req.query),
    };
    let search_id = request.search_id;

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.run(request).await {
            // Already reflected on the channel and in the job store
            error!("Search {} failed: {}", search_id, e);
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            search_id,
            job_id: search_id,
            status: "accepted",
        }),
    )
        .into_response()
}

async fn issue_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TokenRequest>,
) -> impl IntoResponse {
    let broker = state.orchestrator.broker();
    let token = match req.topics {
        Some(topics) if !topics.is_empty() => broker.issue_scoped_token(req.search_id, topics),
        _ => broker.issue_token(req.search_id),
    };
    Json(TokenResponse { token })
}

async fn search_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatusQuery>,
) -> impl IntoResponse {
    match state.orchestrator.jobs().get(query.job_id).await {
        // Expired and never-seen jobs are indistinguishable here; both read
        // as still processing and the client keeps its channel subscription
        Ok(None) => Json(serde_json::json!({ "status": JobStatus::Processing })).into_response(),
        Ok(Some(job)) => Json(job).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}
