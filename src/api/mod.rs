//! HTTP API: shared state, error mapping, authentication and the router.

mod collections;
mod gamification;
mod learning;
mod users;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::FromRequestParts,
    http::{StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Utc;
use lms_common::models::{
    Achievement, Badge, Course, Enrollment, Leaderboard, Lesson, Level, Media, Module,
    Progress, Streak, StudentSettings, Tenant,
};
use tracing::error;

use crate::access::AuthUser;
use crate::auth;
use crate::config::LmsConfig;
use crate::context::Ctx;
use crate::db::DbHandle;
use crate::errors::{LmsError, LmsResult};
use crate::notifications::Notifier;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub notifier: Notifier,
    pub config: Arc<LmsConfig>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(db: DbHandle, config: LmsConfig) -> Self {
        Self {
            db,
            notifier: Notifier::new(),
            config: Arc::new(config),
        }
    }

    /// Run a domain service on the blocking pool with a request context.
    pub async fn run<F, R>(&self, f: F) -> Result<R, ApiError>
    where
        F: FnOnce(Ctx<'_>) -> LmsResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let notifier = self.notifier.clone();
        let config = Arc::clone(&self.config);
        let result = self
            .db
            .call(move |db| f(Ctx::new(db, &notifier, &config)))
            .await?;
        Ok(result)
    }
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Locked(String),
    Internal(String),
}

impl From<LmsError> for ApiError {
    fn from(err: LmsError) -> Self {
        let msg = err.to_string();
        match err {
            LmsError::Validation(_)
            | LmsError::UnsupportedMetric { .. }
            | LmsError::CustomProgress => ApiError::BadRequest(msg),
            LmsError::Unauthorized | LmsError::InvalidCredentials => ApiError::Unauthorized(msg),
            LmsError::Forbidden => ApiError::Forbidden(msg),
            LmsError::NotFound { .. } => ApiError::NotFound(msg),
            LmsError::Conflict(_) => ApiError::Conflict(msg),
            LmsError::AccountLocked { .. } => ApiError::Locked(msg),
            LmsError::Database(e) | LmsError::Other(e) => {
                error!(error = %format!("{e:#}"), "request failed");
                ApiError::Internal("Internal server error".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Locked(msg) => (StatusCode::LOCKED, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Authentication ────────────────────────────────────────────────────

/// Raw `Authorization` header value, if any.
pub(crate) fn authorization(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

impl FromRequestParts<SharedState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let header = authorization(parts).ok_or(LmsError::Unauthorized)?;
        let user = state
            .db
            .call(move |db| auth::authenticate(db, &header, Utc::now()))
            .await?;
        Ok(user)
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .merge(users::routes())
        .merge(learning::routes())
        .merge(gamification::routes())
        .merge(collections::crud::<Tenant>("/api/tenants"))
        .merge(collections::crud::<StudentSettings>("/api/student-settings"))
        .merge(collections::crud::<Media>("/api/media"))
        .merge(collections::crud::<Course>("/api/courses"))
        .merge(collections::crud::<Module>("/api/modules"))
        .merge(collections::crud::<Lesson>("/api/lessons"))
        .merge(collections::crud::<Enrollment>("/api/enrollments"))
        .merge(collections::crud::<Progress>("/api/progress"))
        .merge(collections::crud::<Badge>("/api/badges"))
        .merge(collections::crud::<Achievement>("/api/achievements"))
        .merge(collections::crud::<Level>("/api/levels"))
        .merge(collections::crud::<Leaderboard>("/api/leaderboards"))
        .merge(collections::points())
        .merge(collections::read_only::<Streak>("/api/streaks"))
        .route("/health", get(health_check))
}

async fn health_check() -> &'static str {
    "ok"
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::db::LmsDb;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use lms_common::models::{Role, User};
    use tower::ServiceExt;

    pub fn test_state() -> SharedState {
        let db = LmsDb::new_in_memory().unwrap();
        Arc::new(AppState::new(DbHandle::new(db), LmsConfig::default()))
    }

    pub fn app(state: &SharedState) -> Router {
        api_router().with_state(Arc::clone(state))
    }

    /// Insert a user with a fixed password and return it with a session token.
    pub fn login_as(state: &SharedState, email: &str, role: Role, tenant_id: Option<i64>) -> (User, String) {
        let db = state.db.lock_sync().unwrap();
        let user = crate::db::fixtures::user(&db, email, role, tenant_id).unwrap();
        auth::set_password(&db, user.id, "secret").unwrap();
        let session = auth::login(&db, &state.config.auth, email, "secret", Utc::now()).unwrap();
        (user, session.token)
    }

    pub async fn send(
        app: Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header("authorization", format!("Bearer {token}"));
        }
        let req = match body {
            Some(json) => req
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, json)
    }
}
