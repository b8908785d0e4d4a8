//! HTTP inspection and ingestion endpoints.
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use collaboration::{
    ClientStats, CollaborationError, DocumentSnapshot, OperationLogEntry, OriginId, Step, Version,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::AppState;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Conflict {
        message: String,
        current_version: Option<Version>,
    },
    Unprocessable(String),
    Internal(String),
}

impl From<CollaborationError> for ApiError {
    fn from(err: CollaborationError) -> Self {
        match err {
            CollaborationError::VersionMismatch { expected, .. } => ApiError::Conflict {
                message: err.to_string(),
                current_version: Some(expected),
            },
            CollaborationError::ProtocolDisabled(_) => ApiError::Conflict {
                message: err.to_string(),
                current_version: None,
            },
            CollaborationError::OperationApplicationFailure { .. } => {
                ApiError::Unprocessable(err.to_string())
            }
            CollaborationError::InvalidVersion { .. } | CollaborationError::MalformedMessage(_) => {
                ApiError::BadRequest(err.to_string())
            }
            CollaborationError::ConnectionNotFound(_) | CollaborationError::TransportError(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// Versions arrive signed so a negative one gets the same answer as any other invalid version.
fn checked_version(requested: i64, current: Version) -> Result<Version, ApiError> {
    Version::try_from(requested).map_err(|_| {
        ApiError::BadRequest(format!(
            "invalid version {}: current version is {}",
            requested, current
        ))
    })
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Conflict {
                message,
                current_version,
            } => {
                let mut body = json!({ "error": message });
                if let Some(version) = current_version {
                    body["currentVersion"] = json!(version);
                }
                (StatusCode::CONFLICT, body)
            }
            ApiError::Unprocessable(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, json!({ "error": msg }))
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg })),
        };

        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentQuery {
    #[serde(default)]
    pub include_steps: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResponse {
    #[serde(flatten)]
    pub snapshot: DocumentSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<OperationLogEntry>>,
}

/// GET /document - Current document, version and participant count
pub async fn get_document(
    State(state): State<AppState>,
    query: Result<Query<DocumentQuery>, QueryRejection>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let Query(query) = query?;
    let snapshot = state.engine.snapshot();
    // The log only grows, so its first `step_history` entries match the snapshot
    let steps = query.include_steps.then(|| {
        let mut log = state.engine.log();
        log.truncate(snapshot.step_history);
        log
    });

    Ok(Json(DocumentResponse { snapshot, steps }))
}

#[derive(Debug, Deserialize)]
pub struct StepsQuery {
    pub version: i64,
}

#[derive(Debug, Serialize)]
pub struct StepsResponse {
    pub steps: Vec<OperationLogEntry>,
    pub users: usize,
}

/// GET /document/steps?version=V - Log entries newer than V
pub async fn get_steps(
    State(state): State<AppState>,
    query: Result<Query<StepsQuery>, QueryRejection>,
) -> Result<Json<StepsResponse>, ApiError> {
    let Query(query) = query?;
    let version = checked_version(query.version, state.engine.version())?;
    let steps = state.engine.entries_since(version).map_err(|e| {
        warn!("Rejected steps query: {}", e);
        ApiError::from(e)
    })?;

    Ok(Json(StepsResponse {
        steps,
        users: state.engine.participant_count(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct SubmitStepsRequest {
    pub version: i64,
    pub steps: Vec<Step>,
    #[serde(rename = "clientID", default)]
    pub client_id: Option<OriginId>,
}

#[derive(Debug, Serialize)]
pub struct SubmitStepsResponse {
    pub version: Version,
}

/// POST /document/steps - Apply a step batch outside any connection
pub async fn post_steps(
    State(state): State<AppState>,
    req: Result<Json<SubmitStepsRequest>, JsonRejection>,
) -> Result<Json<SubmitStepsResponse>, ApiError> {
    let Json(req) = req.map_err(|e| {
        warn!("Rejected HTTP step batch: {}", e.body_text());
        ApiError::from(e)
    })?;
    let base = checked_version(req.version, state.engine.version())?;
    let count = req.steps.len();
    let version = state
        .engine
        .submit_steps(base, req.steps, req.client_id)
        .map_err(|e| {
            warn!("Rejected HTTP step batch: {}", e);
            ApiError::from(e)
        })?;

    info!("HTTP batch of {} steps accepted at version {}", count, version);
    Ok(Json(SubmitStepsResponse { version }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub clients: usize,
    pub version: Version,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        clients: state.engine.participant_count(),
        version: state.engine.version(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientsResponse {
    pub clients: Vec<ClientStats>,
    pub total_clients: usize,
}

/// GET /clients - Per-connection stats
pub async fn get_clients(State(state): State<AppState>) -> Json<ClientsResponse> {
    let clients = state.engine.client_stats();
    let total_clients = clients.len();
    Json(ClientsResponse {
        clients,
        total_clients,
    })
}
