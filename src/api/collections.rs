use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use lms_common::models::Point;
use serde::Serialize;
use serde_json::Value;

use super::{ApiError, SharedState};
use crate::access::AuthUser;
use crate::collections::{self, Document};
use crate::db::{Filters, Page, Paginated, Record};
use crate::errors::LmsResult;
use crate::hooks;

/// `GET/POST {base}` and `GET/PATCH/DELETE {base}/{id}`.
pub(super) fn crud<D: Document>(base: &str) -> Router<SharedState> {
    Router::new()
        .route(base, get(list_docs::<D>).post(create_doc::<D>))
        .route(
            &format!("{base}/{{id}}"),
            get(get_doc::<D>)
                .patch(update_doc::<D>)
                .delete(delete_doc::<D>),
        )
}

/// `GET {base}` and `GET {base}/{id}` for collections nobody writes directly.
pub(super) fn read_only<R: Record + Serialize>(base: &str) -> Router<SharedState> {
    Router::new()
        .route(base, get(list_docs::<R>))
        .route(&format!("{base}/{{id}}"), get(get_doc::<R>))
}

/// Point history is read-only; a PATCH answers with the ledger rule.
pub(super) fn points() -> Router<SharedState> {
    Router::new()
        .route("/api/points", get(list_docs::<Point>))
        .route("/api/points/{id}", get(get_doc::<Point>).patch(update_point))
}

pub(super) async fn list_docs<R: Record + Serialize>(
    State(state): State<SharedState>,
    user: AuthUser,
    Query(page): Query<Page>,
) -> Result<Json<Paginated<R>>, ApiError> {
    let docs = state
        .db
        .call(move |db| collections::find::<R>(db, &user, Filters::new(), page))
        .await?;
    Ok(Json(docs))
}

pub(super) async fn get_doc<R: Record + Serialize>(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<R>, ApiError> {
    let doc = state
        .db
        .call(move |db| collections::find_by_id::<R>(db, &user, id))
        .await?;
    Ok(Json(doc))
}

async fn create_doc<D: Document>(
    State(state): State<SharedState>,
    user: AuthUser,
    Json(input): Json<D::Input>,
) -> Result<impl IntoResponse, ApiError> {
    let doc = state
        .run(move |ctx| collections::create::<D>(ctx, &user, input))
        .await?;
    Ok((StatusCode::CREATED, Json(doc)))
}

pub(super) async fn update_doc<D: Document>(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(patch): Json<Value>,
) -> Result<Json<D>, ApiError> {
    let doc = state
        .run(move |ctx| collections::update::<D>(ctx, &user, id, patch))
        .await?;
    Ok(Json(doc))
}

pub(super) async fn delete_doc<R: Record + Serialize>(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<R>, ApiError> {
    let doc = state
        .db
        .call(move |db| collections::delete::<R>(db, &user, id))
        .await?;
    Ok(Json(doc))
}

async fn update_point(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Point>, ApiError> {
    state
        .db
        .call(move |db| -> LmsResult<Point> {
            collections::find_by_id::<Point>(db, &user, id)?;
            Err(hooks::reject_point_update())
        })
        .await
        .map(Json)
        .map_err(ApiError::from)
}
