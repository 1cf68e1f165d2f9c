//! Read-only achievement views for the calling student.

use chrono::{DateTime, Utc};
use lms_common::models::{Achievement, Badge};
use serde::Serialize;

use super::{measure, prerequisites_met};
use crate::access::AuthUser;
use crate::db::{Filters, LmsDb};
use crate::errors::{LmsError, LmsResult};

#[derive(Debug, Clone, Serialize)]
pub struct UnlockedAchievement {
    pub achievement: Achievement,
    pub badge: Option<Badge>,
    pub completed_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailableAchievement {
    #[serde(flatten)]
    pub achievement: Achievement,
    pub badge: Option<Badge>,
    pub is_completed: bool,
    pub prerequisites_met: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AchievementProgress {
    pub achievement: Achievement,
    pub current: f64,
    pub threshold: f64,
    pub met: bool,
    pub is_completed: bool,
}

/// The caller's unlocked achievements with their badges, newest first.
pub fn user_achievements(db: &LmsDb, user_id: i64) -> LmsResult<Vec<UnlockedAchievement>> {
    db.unlocked_achievements(user_id)?
        .into_iter()
        .map(|(achievement, completed_at)| -> LmsResult<UnlockedAchievement> {
            let badge = db.get::<Badge>(achievement.badge_id)?;
            Ok(UnlockedAchievement {
                achievement,
                badge,
                completed_at,
            })
        })
        .collect()
}

/// Achievements owned by the caller's tenant, grouped by badge category.
/// Secret ones stay hidden until unlocked.
pub fn available_achievements(db: &LmsDb, user: &AuthUser) -> LmsResult<Vec<AvailableAchievement>> {
    let Some(tenant_id) = user.tenant_id else {
        return Ok(Vec::new());
    };
    let achievements = db.find_all::<Achievement>(
        &Filters::new().eq("tenant_id", tenant_id).raw("is_global = 0"),
        "(SELECT category FROM badges WHERE badges.id = achievements.badge_id), id",
    )?;
    let unlocked = db.unlocked_achievement_ids(user.id)?;

    let mut out = Vec::with_capacity(achievements.len());
    for achievement in achievements {
        let is_completed = unlocked.contains(&achievement.id);
        if achievement.secret && !is_completed {
            continue;
        }
        let badge = db.get::<Badge>(achievement.badge_id)?;
        let prerequisites_met = prerequisites_met(db, user.id, &achievement)?;
        out.push(AvailableAchievement {
            achievement,
            badge,
            is_completed,
            prerequisites_met,
        });
    }
    Ok(out)
}

/// Progress toward one of the tenant's achievements.
pub fn achievement_progress(
    db: &LmsDb,
    user: &AuthUser,
    achievement_id: i64,
    now: DateTime<Utc>,
) -> LmsResult<AchievementProgress> {
    let achievement = db
        .get::<Achievement>(achievement_id)?
        .filter(|a| a.tenant_id.is_some() && a.tenant_id == user.tenant_id)
        .ok_or(LmsError::not_found("Achievement", achievement_id))?;
    let (current, met) = measure(db, user.id, &achievement, now)?;
    let is_completed = db.user_achievement(user.id, achievement.id)?.is_some();
    Ok(AchievementProgress {
        threshold: achievement.criteria.threshold,
        achievement,
        current,
        met,
        is_completed,
    })
}
