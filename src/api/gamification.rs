use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use chrono::Utc;
use lms_common::models::Notification;

use super::collections::get_doc;
use super::{ApiError, SharedState};
use crate::access::AuthUser;
use crate::achievements::{
    self, AchievementProgress, AvailableAchievement, Evaluation, UnlockedAchievement,
};
use crate::db::{Page, Paginated};
use crate::leaderboard::{self, Rankings};
use crate::levels::{self, LevelStatus};
use crate::notifications;

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/achievements/mine", get(my_achievements))
        .route("/api/achievements/available", get(available_achievements))
        .route("/api/achievements/{id}/progress", get(achievement_progress))
        .route("/api/achievements/{id}/check", post(check_achievement))
        .route("/api/leaderboards/{id}/rankings", get(rankings))
        .route("/api/levels/current", get(current_level))
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/{id}", get(get_doc::<Notification>))
        .route("/api/notifications/{id}/read", post(mark_read))
}

async fn my_achievements(
    State(state): State<SharedState>,
    user: AuthUser,
) -> Result<Json<Vec<UnlockedAchievement>>, ApiError> {
    let docs = state
        .db
        .call(move |db| achievements::user_achievements(db, user.id))
        .await?;
    Ok(Json(docs))
}

async fn available_achievements(
    State(state): State<SharedState>,
    user: AuthUser,
) -> Result<Json<Vec<AvailableAchievement>>, ApiError> {
    let docs = state
        .db
        .call(move |db| achievements::available_achievements(db, &user))
        .await?;
    Ok(Json(docs))
}

async fn achievement_progress(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<AchievementProgress>, ApiError> {
    let progress = state
        .db
        .call(move |db| achievements::achievement_progress(db, &user, id, Utc::now()))
        .await?;
    Ok(Json(progress))
}

async fn check_achievement(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Evaluation>, ApiError> {
    let evaluation = state
        .run(move |ctx| achievements::evaluate(ctx, &user, id, Utc::now()))
        .await?;
    Ok(Json(evaluation))
}

async fn rankings(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Rankings>, ApiError> {
    let rankings = state
        .db
        .call(move |db| leaderboard::leaderboard_rankings(db, &user, id, Utc::now()))
        .await?;
    Ok(Json(rankings))
}

async fn current_level(
    State(state): State<SharedState>,
    user: AuthUser,
) -> Result<Json<LevelStatus>, ApiError> {
    let status = state
        .db
        .call(move |db| levels::current_level(db, &user))
        .await?;
    Ok(Json(status))
}

async fn list_notifications(
    State(state): State<SharedState>,
    user: AuthUser,
    Query(page): Query<Page>,
) -> Result<Json<Paginated<Notification>>, ApiError> {
    let docs = state
        .db
        .call(move |db| notifications::list_for_user(db, user.id, page))
        .await?;
    Ok(Json(docs))
}

async fn mark_read(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Notification>, ApiError> {
    let notification = state
        .db
        .call(move |db| notifications::mark_read(db, user.id, id))
        .await?;
    Ok(Json(notification))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::db::fixtures::*;
    use axum::http::StatusCode;
    use lms_common::models::{AchievementType, BadgeCategory, Metric, Role};
    use serde_json::json;

    #[tokio::test]
    async fn test_course_completion_unlocks_achievement() {
        let state = test_state();
        let tenant_id = {
            let db = state.db.lock_sync().unwrap();
            tenant(&db, "acme").unwrap().id
        };
        let (student, token) = login_as(&state, "s@acme.test", Role::Student, Some(tenant_id));
        let (progress_id, lesson_id, achievement_id) = {
            let db = state.db.lock_sync().unwrap();
            let i = user(&db, "i@acme.test", Role::Instructor, Some(tenant_id)).unwrap();
            let c = course(&db, "Rust", Some(tenant_id), i.id).unwrap();
            let m = module(&db, c.id, 1).unwrap();
            let l = lesson(&db, m.id, 1).unwrap();
            let p = progress(&db, student.id, c.id).unwrap();
            let b = tenant_badge(&db, "Finisher", BadgeCategory::Progress, Some(tenant_id)).unwrap();
            let a = achievement(
                &db,
                "First course",
                AchievementType::CourseProgress,
                criteria(Metric::Count, 1.0),
                b.id,
                Some(tenant_id),
            )
            .unwrap();
            (p.id, l.id, a.id)
        };

        let check = format!("/api/achievements/{achievement_id}/check");
        let (status, body) = send(app(&state), "POST", &check, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["unlocked"], false);

        let (status, _) = send(
            app(&state),
            "POST",
            &format!("/api/progress/{progress_id}/complete-lesson"),
            Some(&token),
            Some(json!({"lesson_id": lesson_id})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(app(&state), "POST", &check, Some(&token), None).await;
        assert_eq!(body["newly_unlocked"], true);
        let (_, body) = send(app(&state), "POST", &check, Some(&token), None).await;
        assert_eq!(body["unlocked"], true);
        assert_eq!(body["newly_unlocked"], false);

        let (status, mine) = send(app(&state), "GET", "/api/achievements/mine", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(mine.as_array().unwrap().len(), 1);

        // Lesson points plus the achievement's 25.
        let (status, level) = send(app(&state), "GET", "/api/levels/current", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(level["total_points"], 35);

        let (status, page) = send(app(&state), "GET", "/api/notifications", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let first = &page["docs"][0];
        assert_eq!(first["notification_type"], "achievement_unlocked");
        let id = first["id"].as_i64().unwrap();

        let (status, read) = send(
            app(&state),
            "POST",
            &format!("/api/notifications/{id}/read"),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(read["read_at"].is_string());
    }

    #[tokio::test]
    async fn test_rankings_of_unknown_leaderboard() {
        let state = test_state();
        let tenant_id = {
            let db = state.db.lock_sync().unwrap();
            tenant(&db, "acme").unwrap().id
        };
        let (_, token) = login_as(&state, "s@acme.test", Role::Student, Some(tenant_id));
        let (status, _) = send(
            app(&state),
            "GET",
            "/api/leaderboards/77/rankings",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_notifications_of_others_are_hidden() {
        let state = test_state();
        let (owner, _) = login_as(&state, "a@x.test", Role::Student, None);
        let (_, token) = login_as(&state, "b@x.test", Role::Student, None);
        let id = {
            let db = state.db.lock_sync().unwrap();
            crate::notifications::create_notification(
                crate::context::Ctx::new(&db, &state.notifier, &state.config),
                owner.id,
                lms_common::models::NotificationType::LevelUp,
                json!({"level": 2}),
            )
            .unwrap()
            .id
        };
        let (status, _) = send(
            app(&state),
            "POST",
            &format!("/api/notifications/{id}/read"),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(
            app(&state),
            "GET",
            &format!("/api/notifications/{id}"),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
