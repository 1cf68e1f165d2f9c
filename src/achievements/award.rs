use chrono::{DateTime, Utc};
use lms_common::models::{
    Achievement, NotificationType, PointSource, PointSourceRef, PointType,
};
use lms_common::time::format_ts;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use super::{measure, prerequisites_met};
use crate::access::{self, AuthUser, Collection, Operation};
use crate::collections;
use crate::context::Ctx;
use crate::errors::{LmsError, LmsResult};
use crate::notifications;
use crate::points::{self, PointAward};

/// Unlock `achievement` for a student: record the unlock, grant its badge
/// and points, and notify. Returns false when it was already unlocked.
pub fn award_achievement(
    ctx: Ctx<'_>,
    user_id: i64,
    achievement: &Achievement,
    at: DateTime<Utc>,
) -> LmsResult<bool> {
    let db = ctx.db;
    let now = format_ts(&at);
    if !db.insert_user_achievement(user_id, achievement.id, &now)? {
        return Ok(false);
    }
    db.award_badge(user_id, achievement.badge_id, &now)?;

    if achievement.points > 0 {
        points::award_points(
            ctx,
            PointAward {
                student_id: user_id,
                point_type: PointType::AchievementUnlock,
                amount: achievement.points,
                source: PointSourceRef {
                    source_type: PointSource::Achievements,
                    id: achievement.id,
                },
                metadata: Some(json!({
                    "badge_id": achievement.badge_id,
                    "achievement_name": achievement.name,
                })),
            },
        )?;
    }

    info!(user_id, achievement_id = achievement.id, "achievement unlocked");
    if let Err(e) = notifications::create_notification(
        ctx,
        user_id,
        NotificationType::AchievementUnlocked,
        json!({
            "achievement_id": achievement.id,
            "name": achievement.name,
            "badge_id": achievement.badge_id,
            "points": achievement.points,
        }),
    ) {
        warn!(user_id, achievement_id = achievement.id, error = %e, "failed to send achievement notification");
    }
    Ok(true)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Evaluation {
    pub achievement_id: i64,
    pub current: f64,
    pub threshold: f64,
    pub met: bool,
    pub prerequisites_met: bool,
    pub unlocked: bool,
    pub newly_unlocked: bool,
}

/// Check one achievement for the caller and unlock it when earned.
pub fn evaluate(
    ctx: Ctx<'_>,
    user: &AuthUser,
    achievement_id: i64,
    now: DateTime<Utc>,
) -> LmsResult<Evaluation> {
    let db = ctx.db;
    let scope = access::require(Collection::Achievements, Operation::Read, Some(user))?;
    let achievement = collections::load_scoped::<Achievement>(db, achievement_id, scope)?;

    let already = db.user_achievement(user.id, achievement.id)?.is_some();
    let prerequisites_met = prerequisites_met(db, user.id, &achievement)?;
    let (current, met) = measure(db, user.id, &achievement, now)?;

    let mut newly_unlocked = false;
    if !already && prerequisites_met && met {
        newly_unlocked =
            ctx.transaction(|ctx| award_achievement(ctx, user.id, &achievement, now))?;
    }

    Ok(Evaluation {
        achievement_id: achievement.id,
        current,
        threshold: achievement.criteria.threshold,
        met,
        prerequisites_met,
        unlocked: already || newly_unlocked,
        newly_unlocked,
    })
}
