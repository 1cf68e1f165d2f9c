use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use lms_common::models::User;
use serde::Deserialize;

use super::collections::{delete_doc, get_doc, list_docs, update_doc};
use super::{ApiError, SharedState};
use crate::access::AuthUser;
use crate::auth::{self, BEARER_SCHEME};
use crate::collections::UserInput;
use crate::errors::LmsError;

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/users", get(list_docs::<User>).post(create_user))
        .route("/api/users/login", post(login))
        .route("/api/users/logout", post(logout))
        .route("/api/users/me", get(me))
        .route(
            "/api/users/{id}",
            get(get_doc::<User>)
                .patch(update_doc::<User>)
                .delete(delete_doc::<User>),
        )
        .route("/api/users/{id}/api-key", post(generate_api_key))
}

#[derive(Deserialize)]
struct CreateUserRequest {
    #[serde(flatten)]
    user: UserInput,
    password: String,
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

async fn create_user(
    State(state): State<SharedState>,
    caller: AuthUser,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .run(move |ctx| auth::create_user(ctx, &caller, req.user, &req.password))
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn login(
    State(state): State<SharedState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let config = state.config.auth.clone();
    let session = state
        .db
        .call(move |db| auth::login(db, &config, &req.email, &req.password, Utc::now()))
        .await?;
    Ok(Json(session))
}

async fn logout(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix(BEARER_SCHEME))
        .map(|t| t.trim().to_string())
        .ok_or(LmsError::Unauthorized)?;
    let removed = state.db.call(move |db| auth::logout(db, &token)).await?;
    if !removed {
        return Err(LmsError::Unauthorized.into());
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn me(State(state): State<SharedState>, user: AuthUser) -> Result<Json<User>, ApiError> {
    let doc = state
        .db
        .call(move |db| {
            db.get::<User>(user.id)?
                .ok_or(LmsError::not_found("User", user.id))
        })
        .await?;
    Ok(Json(doc))
}

async fn generate_api_key(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let key = state
        .db
        .call(move |db| auth::generate_api_key(db, &caller, id))
        .await?;
    Ok(Json(serde_json::json!({"api_key": key})))
}
