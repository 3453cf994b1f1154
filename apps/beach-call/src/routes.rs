use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::auth::BearerIdentity;
use crate::error::SessionError;
use crate::session::Session;
use crate::state::AppState;
use crate::websocket::websocket_handler;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(service_info))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/api/auth/login", post(login))
        .route(
            "/api/session",
            post(create_session).get(get_session).delete(cancel_session),
        )
        .route("/api/session/accept", post(accept_session))
        .route("/api/session/decline", post(decline_session))
        .route("/ws", get(websocket_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Forbidden(SessionError),
    NotFound(SessionError),
    Conflict(SessionError),
    Invalid(SessionError),
    BadRequest(String),
    Internal,
}

#[derive(Debug, Serialize)]
struct ApiErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
    message: Option<String>,
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, Option<&'static str>, Option<String>) {
        match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None, None),
            ApiError::Forbidden(err) => (
                StatusCode::FORBIDDEN,
                "forbidden",
                Some(err.reason()),
                Some(err.to_string()),
            ),
            ApiError::NotFound(err) => (
                StatusCode::NOT_FOUND,
                "not_found",
                Some(err.reason()),
                Some(err.to_string()),
            ),
            ApiError::Conflict(err) => (
                StatusCode::CONFLICT,
                "conflict",
                Some(err.reason()),
                Some(err.to_string()),
            ),
            ApiError::Invalid(err) => (
                StatusCode::BAD_REQUEST,
                "bad_request",
                Some(err.reason()),
                Some(err.to_string()),
            ),
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", None, Some(msg.clone()))
            }
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                None,
                None,
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, reason, message) = self.parts();
        (
            status,
            Json(ApiErrorBody {
                error,
                reason,
                message,
            }),
        )
            .into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::AlreadyInSession | SessionError::TargetBusy => ApiError::Conflict(err),
            SessionError::SelfTarget | SessionError::InvalidState => ApiError::Invalid(err),
            SessionError::Forbidden => ApiError::Forbidden(err),
            SessionError::NoSession | SessionError::SessionNotFound => ApiError::NotFound(err),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub target_username: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    status: &'static str,
    connections: usize,
    sessions: usize,
}

async fn service_info() -> impl IntoResponse {
    Json(json!({
        "name": "beach-call",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "auth": "/api/auth/login",
            "session": "/api/session",
            "websocket": "/ws?token=YOUR_JWT_TOKEN",
        },
    }))
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        connections: state.engine().registry().len(),
        sessions: state.engine().active_sessions(),
    })
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.render_metrics() {
        Some(body) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// POST /api/auth/login
async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<LoginResponse> {
    let Json(payload) = payload?;
    let username = payload.username.trim();
    if username.is_empty() {
        return Err(ApiError::BadRequest("username required".into()));
    }

    let issued = state.issuer().issue(username).map_err(|err| {
        error!(error = %err, "failed to issue token");
        ApiError::Internal
    })?;
    info!(identity = %username, "user logged in");

    Ok(Json(LoginResponse {
        token: issued.token,
        expires_at: issued.expires_at,
    }))
}

/// POST /api/session
async fn create_session(
    State(state): State<AppState>,
    BearerIdentity(identity): BearerIdentity,
    payload: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> ApiResult<Session> {
    let Json(payload) = payload?;
    let target = payload.target_username.trim();
    if target.is_empty() {
        return Err(ApiError::BadRequest("targetUsername required".into()));
    }
    Ok(Json(state.engine().create(&identity, target, &payload.kind)?))
}

/// GET /api/session
async fn get_session(
    State(state): State<AppState>,
    BearerIdentity(identity): BearerIdentity,
) -> ApiResult<Session> {
    Ok(Json(state.engine().get(&identity)?))
}

/// POST /api/session/accept
async fn accept_session(
    State(state): State<AppState>,
    BearerIdentity(identity): BearerIdentity,
) -> ApiResult<Session> {
    Ok(Json(state.engine().accept(&identity)?))
}

/// POST /api/session/decline
async fn decline_session(
    State(state): State<AppState>,
    BearerIdentity(identity): BearerIdentity,
) -> ApiResult<Session> {
    Ok(Json(state.engine().decline(&identity)?))
}

/// DELETE /api/session
async fn cancel_session(
    State(state): State<AppState>,
    BearerIdentity(identity): BearerIdentity,
) -> ApiResult<Session> {
    Ok(Json(state.engine().cancel(&identity)?))
}
