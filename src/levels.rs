//! Level resolution from point totals.

use lms_common::models::{Level, NotificationType, RewardType, User};
use lms_common::time::now_ts;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::access::AuthUser;
use crate::context::Ctx;
use crate::db::LmsDb;
use crate::errors::{LmsError, LmsResult};
use crate::notifications;

/// Highest level whose threshold the total has reached.
pub fn level_for_points(levels: &[Level], total: i64) -> Option<&Level> {
    levels
        .iter()
        .filter(|l| l.points_required <= total)
        .max_by_key(|l| (l.points_required, l.level))
}

/// Lowest level still out of reach.
pub fn next_level(levels: &[Level], total: i64) -> Option<&Level> {
    levels
        .iter()
        .filter(|l| l.points_required > total)
        .min_by_key(|l| (l.points_required, l.level))
}

#[derive(Debug, Clone, Serialize)]
pub struct LevelStatus {
    pub total_points: i64,
    pub level: Option<Level>,
    pub next_level: Option<Level>,
    pub points_to_next: Option<i64>,
}

pub fn level_status(db: &LmsDb, user_id: i64, tenant_id: Option<i64>) -> LmsResult<LevelStatus> {
    let total_points = db.sum_points(user_id)?;
    let levels = db.levels_for_tenant(tenant_id)?;
    let level = level_for_points(&levels, total_points).cloned();
    let next = next_level(&levels, total_points).cloned();
    Ok(LevelStatus {
        total_points,
        points_to_next: next.as_ref().map(|l| l.points_required - total_points),
        level,
        next_level: next,
    })
}

pub fn current_level(db: &LmsDb, user: &AuthUser) -> LmsResult<LevelStatus> {
    level_status(db, user.id, user.tenant_id)
}

/// Announce a level change after a student's total moved from `before` to
/// `after`, granting the new level's badge rewards.
pub fn on_points_changed(
    ctx: Ctx<'_>,
    student_id: i64,
    before: i64,
    after: i64,
) -> LmsResult<Option<Level>> {
    let db = ctx.db;
    let student = db
        .get::<User>(student_id)?
        .ok_or(LmsError::not_found("User", student_id))?;
    let levels = db.levels_for_tenant(student.tenant_id)?;
    let old = level_for_points(&levels, before).map(|l| l.id);
    let Some(new) = level_for_points(&levels, after) else {
        return Ok(None);
    };
    if old == Some(new.id) {
        return Ok(None);
    }

    info!(student_id, level = new.level, "level up");
    notifications::create_notification(
        ctx,
        student_id,
        NotificationType::LevelUp,
        json!({
            "level_id": new.id,
            "level": new.level,
            "name": new.name,
            "total_points": after,
        }),
    )?;

    let now = now_ts();
    for reward in &new.rewards {
        match (reward.reward_type, reward.badge_id) {
            (RewardType::Badge, Some(badge_id)) => {
                if db.award_badge(student_id, badge_id, &now)? {
                    notifications::create_notification(
                        ctx,
                        student_id,
                        NotificationType::BadgeAwarded,
                        json!({ "badge_id": badge_id, "level": new.level }),
                    )?;
                }
            }
            (RewardType::Badge, None) => {
                warn!(level_id = new.id, "badge reward without a badge")
            }
            // Feature and custom rewards are informational.
            _ => {}
        }
    }
    Ok(Some(new.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LmsConfig;
    use crate::db::fixtures::*;
    use crate::notifications::Notifier;
    use anyhow::Result;
    use lms_common::models::{Badge, BadgeCategory, BadgeRarity, LevelReward, Role};

    fn level(db: &LmsDb, n: i64, points: i64, rewards: Vec<LevelReward>) -> Result<Level> {
        let now = now_ts();
        db.create(&Level {
            id: 0,
            name: format!("Level {n}"),
            level: n,
            description: None,
            points_required: points,
            tenant_id: None,
            is_global: true,
            icon_id: None,
            rewards,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    #[test]
    fn test_level_for_points_picks_highest_reached() -> Result<()> {
        let db = LmsDb::new_in_memory()?;
        level(&db, 1, 0, vec![])?;
        level(&db, 2, 100, vec![])?;
        level(&db, 3, 250, vec![])?;
        let levels = db.levels_for_tenant(None)?;

        assert_eq!(level_for_points(&levels, 0).map(|l| l.level), Some(1));
        assert_eq!(level_for_points(&levels, 99).map(|l| l.level), Some(1));
        assert_eq!(level_for_points(&levels, 100).map(|l| l.level), Some(2));
        assert_eq!(level_for_points(&levels, 10_000).map(|l| l.level), Some(3));
        assert_eq!(next_level(&levels, 120).map(|l| l.level), Some(3));
        assert!(next_level(&levels, 300).is_none());
        assert!(level_for_points(&[], 5).is_none());
        Ok(())
    }

    #[test]
    fn test_level_status_reports_distance() -> Result<()> {
        let db = LmsDb::new_in_memory()?;
        level(&db, 1, 0, vec![])?;
        level(&db, 2, 100, vec![])?;
        let s = user(&db, "s@x.test", Role::Student, None)?;
        let status = level_status(&db, s.id, None)?;
        assert_eq!(status.total_points, 0);
        assert_eq!(status.level.map(|l| l.level), Some(1));
        assert_eq!(status.points_to_next, Some(100));
        Ok(())
    }

    #[test]
    fn test_level_up_grants_badge_reward() -> Result<()> {
        let db = LmsDb::new_in_memory()?;
        let notifier = Notifier::new();
        let config = LmsConfig::default();
        let now = now_ts();
        let badge = db.create(&Badge {
            id: 0,
            name: "Climber".to_string(),
            description: String::new(),
            icon_id: None,
            rarity: BadgeRarity::Rare,
            category: BadgeCategory::Progress,
            tenant_id: None,
            is_global: true,
            created_at: now.clone(),
            updated_at: now,
        })?;
        level(&db, 1, 0, vec![])?;
        level(
            &db,
            2,
            100,
            vec![LevelReward {
                reward_type: RewardType::Badge,
                badge_id: Some(badge.id),
                feature: None,
                custom_data: None,
            }],
        )?;
        let s = user(&db, "s@x.test", Role::Student, None)?;
        let ctx = Ctx::new(&db, &notifier, &config);

        assert!(on_points_changed(ctx, s.id, 0, 50)?.is_none());
        let reached = on_points_changed(ctx, s.id, 50, 120)?;
        assert_eq!(reached.map(|l| l.level), Some(2));
        assert_eq!(db.user_badges(s.id)?.len(), 1);
        Ok(())
    }
}
