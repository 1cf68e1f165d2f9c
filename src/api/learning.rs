use axum::{
    Json, Router,
    extract::{Path, State},
    routing::post,
};
use lms_common::models::Progress;

use super::{ApiError, SharedState};
use crate::access::AuthUser;
use crate::learning::{
    self, AssignmentInput, CompleteLessonInput, DiscussionInput, LessonCompletion,
    ModuleProgressInput, QuizAttemptInput,
};

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/progress/{id}/quiz-attempts", post(quiz_attempt))
        .route("/api/progress/{id}/discussions", post(discussion))
        .route("/api/progress/{id}/assignments", post(assignment))
        .route("/api/progress/{id}/modules", post(module_progress))
        .route("/api/progress/{id}/complete-lesson", post(complete_lesson))
}

async fn quiz_attempt(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(input): Json<QuizAttemptInput>,
) -> Result<Json<Progress>, ApiError> {
    let progress = state
        .run(move |ctx| learning::record_quiz_attempt(ctx, &user, id, input))
        .await?;
    Ok(Json(progress))
}

async fn discussion(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(input): Json<DiscussionInput>,
) -> Result<Json<Progress>, ApiError> {
    let progress = state
        .run(move |ctx| learning::record_discussion(ctx, &user, id, input))
        .await?;
    Ok(Json(progress))
}

async fn assignment(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(input): Json<AssignmentInput>,
) -> Result<Json<Progress>, ApiError> {
    let progress = state
        .run(move |ctx| learning::record_assignment(ctx, &user, id, input))
        .await?;
    Ok(Json(progress))
}

async fn module_progress(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(input): Json<ModuleProgressInput>,
) -> Result<Json<Progress>, ApiError> {
    let progress = state
        .run(move |ctx| learning::record_module_progress(ctx, &user, id, input))
        .await?;
    Ok(Json(progress))
}

async fn complete_lesson(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(input): Json<CompleteLessonInput>,
) -> Result<Json<LessonCompletion>, ApiError> {
    let completion = state
        .run(move |ctx| learning::complete_lesson(ctx, &user, id, input))
        .await?;
    Ok(Json(completion))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::db::fixtures::*;
    use axum::http::StatusCode;
    use lms_common::models::Role;
    use serde_json::json;

    struct Setup {
        token: String,
        progress_id: i64,
        lesson_id: i64,
    }

    fn setup(state: &super::SharedState) -> Setup {
        let tenant_id = {
            let db = state.db.lock_sync().unwrap();
            tenant(&db, "acme").unwrap().id
        };
        let (student, token) = login_as(state, "s@acme.test", Role::Student, Some(tenant_id));
        let db = state.db.lock_sync().unwrap();
        let instructor = user(&db, "i@acme.test", Role::Instructor, student.tenant_id).unwrap();
        let c = course(&db, "Rust", student.tenant_id, instructor.id).unwrap();
        let m = module(&db, c.id, 1).unwrap();
        let l = lesson(&db, m.id, 1).unwrap();
        let p = progress(&db, student.id, c.id).unwrap();
        Setup {
            token,
            progress_id: p.id,
            lesson_id: l.id,
        }
    }

    #[tokio::test]
    async fn test_complete_lesson_awards_points_once() {
        let state = test_state();
        let s = setup(&state);
        let uri = format!("/api/progress/{}/complete-lesson", s.progress_id);

        let (status, body) = send(
            app(&state),
            "POST",
            &uri,
            Some(&s.token),
            Some(json!({"lesson_id": s.lesson_id})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["newly_completed"], true);
        assert_eq!(body["points_awarded"], 10);
        assert_eq!(body["progress"]["status"], "completed");

        let (status, body) = send(
            app(&state),
            "POST",
            &uri,
            Some(&s.token),
            Some(json!({"lesson_id": s.lesson_id})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["newly_completed"], false);
        assert_eq!(body["points_awarded"], 0);
    }

    #[tokio::test]
    async fn test_quiz_score_out_of_range() {
        let state = test_state();
        let s = setup(&state);
        let (status, _) = send(
            app(&state),
            "POST",
            &format!("/api/progress/{}/quiz-attempts", s.progress_id),
            Some(&s.token),
            Some(json!({"lesson_id": s.lesson_id, "score": 140.0})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_other_students_progress_is_forbidden() {
        let state = test_state();
        let s = setup(&state);
        let (_, intruder) = {
            let tenant_id = {
                let db = state.db.lock_sync().unwrap();
                tenant(&db, "other").unwrap().id
            };
            login_as(&state, "x@other.test", Role::Student, Some(tenant_id))
        };
        let (status, _) = send(
            app(&state),
            "POST",
            &format!("/api/progress/{}/discussions", s.progress_id),
            Some(&intruder),
            Some(json!({"lesson_id": s.lesson_id})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
