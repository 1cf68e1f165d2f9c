//! Daily activity streaks.
//!
//! A streak counts consecutive UTC days with at least one activity of its
//! type. Several activities on one day count once.

use chrono::{DateTime, Duration, Utc};
use lms_common::models::{ActivityKind, NotificationType, Streak, StreakHistoryEntry, StreakType};
use lms_common::time::{format_ts, parse_ts, start_of_day};
use serde_json::json;
use tracing::{debug, info};

use crate::context::Ctx;
use crate::errors::{LmsError, LmsResult};
use crate::{hooks, notifications};

/// Every this many consecutive days a milestone notification is sent.
pub const MILESTONE_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy)]
pub struct Activity {
    pub kind: ActivityKind,
    pub id: i64,
    pub points: i64,
}

/// Deadline for the next activity: the end of the day after `at`.
pub fn next_required(at: &DateTime<Utc>) -> DateTime<Utc> {
    start_of_day(at) + Duration::days(2)
}

/// Record one activity at `at` and return the updated streak.
pub fn record_activity(
    ctx: Ctx<'_>,
    student_id: i64,
    streak_type: StreakType,
    activity: Activity,
    at: DateTime<Utc>,
) -> LmsResult<Streak> {
    let db = ctx.db;
    let entry = StreakHistoryEntry {
        date: at,
        activity_kind: activity.kind,
        activity_id: activity.id,
        points: activity.points,
    };
    let now = format_ts(&at);

    let Some(mut streak) = db.streak_for(student_id, streak_type)? else {
        let streak = db
            .create(&Streak {
                id: 0,
                student_id,
                streak_type,
                current_streak: 1,
                longest_streak: 1,
                last_activity: now.clone(),
                next_required: format_ts(&next_required(&at)),
                history: vec![entry],
                created_at: now.clone(),
                updated_at: now,
            })
            .map_err(LmsError::from_storage)?;
        debug!(student_id, kind = streak_type.as_str(), "streak started");
        return Ok(streak);
    };

    let last = parse_ts(&streak.last_activity)
        .map_err(|e| LmsError::Other(anyhow::anyhow!("Invalid last_activity: {e}")))?;
    let gap = (start_of_day(&at) - start_of_day(&last)).num_days();
    let previous = streak.current_streak;
    match gap {
        1 => streak.current_streak += 1,
        g if g > 1 => streak.current_streak = 1,
        // Same day, or an activity older than the last one.
        _ => {}
    }
    if gap >= 0 {
        streak.last_activity = now.clone();
        streak.next_required = format_ts(&next_required(&at));
    }
    streak.history.push(entry);
    streak.updated_at = now;
    hooks::keep_longest_streak(&mut streak);
    let streak = db.save(&streak).map_err(LmsError::from_storage)?;

    if streak.current_streak > previous && streak.current_streak % MILESTONE_DAYS == 0 {
        info!(
            student_id,
            kind = streak_type.as_str(),
            days = streak.current_streak,
            "streak milestone"
        );
        notifications::create_notification(
            ctx,
            student_id,
            NotificationType::StreakMilestone,
            json!({
                "streak_type": streak_type,
                "days": streak.current_streak,
            }),
        )?;
    }
    Ok(streak)
}
