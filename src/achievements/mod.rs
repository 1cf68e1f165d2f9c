//! Achievement evaluation and unlocking.
//!
//! An achievement unlocks when its prerequisites are unlocked and the
//! student's progress metric reaches the criteria threshold. Unlocking
//! grants the achievement's badge and points.

mod award;
mod catalog;
mod progress;

pub use award::{Evaluation, award_achievement, evaluate};
pub use catalog::{
    AchievementProgress, AvailableAchievement, UnlockedAchievement, achievement_progress,
    available_achievements, user_achievements,
};
pub use progress::get_progress;

use chrono::{DateTime, Utc};
use lms_common::models::{Achievement, AchievementType, Metric};

use crate::db::LmsDb;
use crate::errors::{LmsError, LmsResult};

/// Current value and whether it meets the threshold. Custom criteria and
/// students without any progress record never meet it.
pub(crate) fn measure(
    db: &LmsDb,
    user_id: i64,
    achievement: &Achievement,
    now: DateTime<Utc>,
) -> LmsResult<(f64, bool)> {
    let criteria = &achievement.criteria;
    if achievement.achievement_type == AchievementType::Custom || criteria.metric == Metric::Custom {
        return Ok((0.0, false));
    }
    if !db.has_progress(user_id)? {
        return Ok((0.0, false));
    }
    let current = get_progress(
        db,
        user_id,
        achievement.achievement_type,
        criteria.metric,
        criteria.timeframe,
        now,
    )?;
    Ok((current, current >= criteria.threshold))
}

fn load(db: &LmsDb, achievement_id: i64) -> LmsResult<Achievement> {
    db.get::<Achievement>(achievement_id)?
        .ok_or(LmsError::not_found("Achievement", achievement_id))
}

/// Whether the student's progress meets the achievement's criteria.
pub fn check_progress(
    db: &LmsDb,
    user_id: i64,
    achievement_id: i64,
    now: DateTime<Utc>,
) -> LmsResult<bool> {
    let achievement = load(db, achievement_id)?;
    Ok(measure(db, user_id, &achievement, now)?.1)
}

pub(crate) fn prerequisites_met(db: &LmsDb, user_id: i64, achievement: &Achievement) -> LmsResult<bool> {
    if achievement.prerequisites.is_empty() {
        return Ok(true);
    }
    let unlocked = db.unlocked_achievement_ids(user_id)?;
    Ok(achievement
        .prerequisites
        .iter()
        .all(|id| unlocked.contains(id)))
}

/// Whether every prerequisite of the achievement has been unlocked.
pub fn check_prerequisites(db: &LmsDb, user_id: i64, achievement_id: i64) -> LmsResult<bool> {
    let achievement = load(db, achievement_id)?;
    prerequisites_met(db, user_id, &achievement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures::*;
    use anyhow::Result;
    use lms_common::models::{BadgeCategory, QuizAttempt, Role};
    use lms_common::time::{now_ts, parse_ts};

    #[test]
    fn test_check_progress_requires_a_progress_record() -> Result<()> {
        let db = LmsDb::new_in_memory()?;
        let t = tenant(&db, "acme")?;
        let i = user(&db, "i@acme.test", Role::Instructor, Some(t.id))?;
        let s = user(&db, "s@acme.test", Role::Student, Some(t.id))?;
        let b = tenant_badge(&db, "Quizzer", BadgeCategory::Performance, Some(t.id))?;
        let a = achievement(&db, "First quiz", AchievementType::QuizScore, criteria(Metric::Count, 1.0), b.id, Some(t.id))?;
        let now = parse_ts("2024-05-01T12:00:00Z")?;

        assert!(!check_progress(&db, s.id, a.id, now)?);

        let c = course(&db, "One", Some(t.id), i.id)?;
        let mut p = progress(&db, s.id, c.id)?;
        p.quiz_attempts.push(QuizAttempt {
            lesson_id: 1,
            score: 50.0,
            completed_at: parse_ts("2024-04-01T12:00:00Z")?,
        });
        db.save(&p)?;
        assert!(check_progress(&db, s.id, a.id, now)?);
        Ok(())
    }

    #[test]
    fn test_check_progress_missing_achievement() -> Result<()> {
        let db = LmsDb::new_in_memory()?;
        let s = user(&db, "s@x.test", Role::Student, None)?;
        let err = check_progress(&db, s.id, 404, chrono::Utc::now()).unwrap_err();
        assert_eq!(err.to_string(), "Achievement 404 not found");
        Ok(())
    }

    #[test]
    fn test_custom_criteria_never_met() -> Result<()> {
        let db = LmsDb::new_in_memory()?;
        let t = tenant(&db, "acme")?;
        let i = user(&db, "i@acme.test", Role::Instructor, Some(t.id))?;
        let s = user(&db, "s@acme.test", Role::Student, Some(t.id))?;
        let c = course(&db, "One", Some(t.id), i.id)?;
        progress(&db, s.id, c.id)?;
        let b = tenant_badge(&db, "Odd", BadgeCategory::Special, Some(t.id))?;
        let custom = achievement(&db, "Custom", AchievementType::Custom, criteria(Metric::Count, 0.0), b.id, Some(t.id))?;
        let metric = achievement(&db, "Metric", AchievementType::QuizScore, criteria(Metric::Custom, 0.0), b.id, Some(t.id))?;
        let now = chrono::Utc::now();
        assert!(!check_progress(&db, s.id, custom.id, now)?);
        assert!(!check_progress(&db, s.id, metric.id, now)?);
        Ok(())
    }

    #[test]
    fn test_prerequisites_require_every_unlock() -> Result<()> {
        let db = LmsDb::new_in_memory()?;
        let s = user(&db, "s@x.test", Role::Student, None)?;
        let b = tenant_badge(&db, "Any", BadgeCategory::Progress, None)?;
        let first = achievement(&db, "First", AchievementType::QuizScore, criteria(Metric::Count, 1.0), b.id, None)?;
        let second = achievement(&db, "Second", AchievementType::QuizScore, criteria(Metric::Count, 2.0), b.id, None)?;
        let mut third = achievement(&db, "Third", AchievementType::QuizScore, criteria(Metric::Count, 3.0), b.id, None)?;
        assert!(check_prerequisites(&db, s.id, third.id)?);

        third.prerequisites = vec![first.id, second.id];
        db.save(&third)?;
        db.insert_user_achievement(s.id, first.id, &now_ts())?;
        assert!(!check_prerequisites(&db, s.id, third.id)?);
        db.insert_user_achievement(s.id, second.id, &now_ts())?;
        assert!(check_prerequisites(&db, s.id, third.id)?);
        Ok(())
    }
}
