//! Before-change rules shared by the collection services.
//!
//! These are pure functions over documents; anything that needs the store
//! (uniqueness, capacity, prerequisites) lives with the collection.

use std::sync::LazyLock;

use lms_common::models::{Duration, Enrollment, EnrollmentStatus, Leaderboard, Progress, Streak};
use lms_common::time::{format_ts, parse_ts};
use regex::Regex;

use crate::access::AuthUser;
use crate::errors::{LmsError, LmsResult};

static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static NON_SLUG_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

pub const MIN_REFRESH_INTERVAL: i64 = 300;
pub const MAX_DISPLAY_LIMIT: i64 = 100;

/// Tenant slug: lowercase, whitespace runs become `-`.
pub fn tenant_slug(name: &str) -> String {
    WHITESPACE_RUN
        .replace_all(&name.to_lowercase(), "-")
        .into_owned()
}

/// Course slug: lowercase, every run of non-alphanumerics becomes `-`,
/// with no leading or trailing `-`.
pub fn course_slug(title: &str) -> String {
    NON_SLUG_RUN
        .replace_all(&title.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

/// Tenant for a new document: global documents have none, otherwise the
/// requested tenant or the caller's.
pub fn resolve_tenant(requested: Option<i64>, is_global: bool, user: &AuthUser) -> Option<i64> {
    if is_global {
        None
    } else {
        requested.or(user.tenant_id)
    }
}

pub fn validate_duration(duration: &Duration) -> LmsResult<()> {
    if duration.minutes > 59 {
        return Err(LmsError::validation("Duration minutes must be between 0 and 59"));
    }
    Ok(())
}

/// Re-store a client-supplied timestamp as second-precision UTC.
pub fn normalize_ts(field: &str, value: &mut String) -> LmsResult<()> {
    let parsed = parse_ts(value)
        .map_err(|_| LmsError::validation(format!("{field} must be an RFC 3339 timestamp")))?;
    *value = format_ts(&parsed);
    Ok(())
}

pub fn normalize_opt_ts(field: &str, value: &mut Option<String>) -> LmsResult<()> {
    match value {
        Some(value) => normalize_ts(field, value),
        None => Ok(()),
    }
}

/// Timeframe windows compare these as text.
pub fn normalize_progress_times(progress: &mut Progress) -> LmsResult<()> {
    normalize_ts("started_at", &mut progress.started_at)?;
    normalize_opt_ts("completed_at", &mut progress.completed_at)
}

pub fn normalize_enrollment_times(enrollment: &mut Enrollment) -> LmsResult<()> {
    normalize_ts("enrolled_at", &mut enrollment.enrolled_at)?;
    normalize_opt_ts("started_at", &mut enrollment.started_at)?;
    normalize_opt_ts("completed_at", &mut enrollment.completed_at)?;
    normalize_opt_ts("dropped_at", &mut enrollment.dropped_at)?;
    normalize_opt_ts("expires_at", &mut enrollment.expires_at)
}

/// Stamp the timestamp matching an enrollment's new status.
pub fn stamp_enrollment_status(enrollment: &mut Enrollment, now: &str) {
    match enrollment.status {
        EnrollmentStatus::Active => {
            if enrollment.started_at.is_none() {
                enrollment.started_at = Some(now.to_string());
            }
        }
        EnrollmentStatus::Completed => enrollment.completed_at = Some(now.to_string()),
        EnrollmentStatus::Dropped => enrollment.dropped_at = Some(now.to_string()),
        EnrollmentStatus::Pending => {}
    }
}

pub fn touch_progress(progress: &mut Progress, now: &str) {
    progress.overall_progress = progress.overall_progress.clamp(0, 100);
    progress.last_accessed = now.to_string();
    progress.updated_at = now.to_string();
}

pub fn keep_longest_streak(streak: &mut Streak) {
    streak.longest_streak = streak.longest_streak.max(streak.current_streak);
}

pub fn validate_leaderboard(board: &Leaderboard) -> LmsResult<()> {
    if !board.is_global && board.tenant_id.is_none() {
        return Err(LmsError::validation(
            "Tenant is required when leaderboard is not global",
        ));
    }
    if !(1..=MAX_DISPLAY_LIMIT).contains(&board.display_limit) {
        return Err(LmsError::validation(format!(
            "Display limit must be between 1 and {MAX_DISPLAY_LIMIT}"
        )));
    }
    if board.refresh_interval < MIN_REFRESH_INTERVAL {
        return Err(LmsError::validation(format!(
            "Refresh interval must be at least {MIN_REFRESH_INTERVAL} seconds"
        )));
    }
    Ok(())
}

pub fn reject_point_update() -> LmsError {
    LmsError::validation("Points cannot be modified after creation")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures::blank_progress;
    use lms_common::models::{
        LeaderboardScope, LeaderboardType, Role, StreakType, Timeframe,
    };

    fn caller(tenant_id: Option<i64>) -> AuthUser {
        AuthUser {
            id: 1,
            role: Role::Instructor,
            tenant_id,
        }
    }

    #[test]
    fn test_tenant_slug_collapses_whitespace() {
        assert_eq!(tenant_slug("Acme  Learning Co"), "acme-learning-co");
        assert_eq!(tenant_slug("Already-Slug"), "already-slug");
    }

    #[test]
    fn test_course_slug_strips_punctuation() {
        assert_eq!(course_slug("Intro to Rust!"), "intro-to-rust");
        assert_eq!(course_slug("  C++ & You  "), "c-you");
        assert_eq!(course_slug("***"), "");
    }

    #[test]
    fn test_resolve_tenant() {
        let u = caller(Some(5));
        assert_eq!(resolve_tenant(None, false, &u), Some(5));
        assert_eq!(resolve_tenant(Some(9), false, &u), Some(9));
        assert_eq!(resolve_tenant(Some(9), true, &u), None);
        assert_eq!(resolve_tenant(None, false, &caller(None)), None);
    }

    #[test]
    fn test_duration_minutes_bound() {
        assert!(validate_duration(&Duration { hours: 3, minutes: 59 }).is_ok());
        assert!(validate_duration(&Duration { hours: 0, minutes: 60 }).is_err());
    }

    #[test]
    fn test_enrollment_status_stamps() {
        let mut e = Enrollment {
            id: 1,
            student_id: 1,
            course_id: 1,
            status: EnrollmentStatus::Active,
            enrolled_at: "2024-01-01T00:00:00Z".to_string(),
            started_at: None,
            completed_at: None,
            dropped_at: None,
            expires_at: None,
            is_active: true,
            created_at: "2024-01-01T00:00:00Z".to_string(),
            updated_at: "2024-01-01T00:00:00Z".to_string(),
        };
        stamp_enrollment_status(&mut e, "2024-01-02T00:00:00Z");
        assert_eq!(e.started_at.as_deref(), Some("2024-01-02T00:00:00Z"));

        // An existing start is kept.
        stamp_enrollment_status(&mut e, "2024-01-03T00:00:00Z");
        assert_eq!(e.started_at.as_deref(), Some("2024-01-02T00:00:00Z"));

        e.status = EnrollmentStatus::Completed;
        stamp_enrollment_status(&mut e, "2024-01-04T00:00:00Z");
        assert_eq!(e.completed_at.as_deref(), Some("2024-01-04T00:00:00Z"));

        e.status = EnrollmentStatus::Dropped;
        stamp_enrollment_status(&mut e, "2024-01-05T00:00:00Z");
        assert_eq!(e.dropped_at.as_deref(), Some("2024-01-05T00:00:00Z"));
    }

    #[test]
    fn test_touch_progress_clamps() {
        let mut p = blank_progress(1, 1);
        p.overall_progress = 140;
        touch_progress(&mut p, "2024-01-01T00:00:00Z");
        assert_eq!(p.overall_progress, 100);
        assert_eq!(p.last_accessed, "2024-01-01T00:00:00Z");
        p.overall_progress = -3;
        touch_progress(&mut p, "2024-01-01T00:00:00Z");
        assert_eq!(p.overall_progress, 0);
    }

    #[test]
    fn test_keep_longest_streak() {
        let mut s = Streak {
            id: 1,
            student_id: 1,
            streak_type: StreakType::Login,
            current_streak: 6,
            longest_streak: 4,
            last_activity: String::new(),
            next_required: String::new(),
            history: vec![],
            created_at: String::new(),
            updated_at: String::new(),
        };
        keep_longest_streak(&mut s);
        assert_eq!(s.longest_streak, 6);
        s.current_streak = 1;
        keep_longest_streak(&mut s);
        assert_eq!(s.longest_streak, 6);
    }

    #[test]
    fn test_leaderboard_validation() {
        let mut board = Leaderboard {
            id: 0,
            name: "Top".to_string(),
            tenant_id: None,
            is_global: false,
            board_type: LeaderboardType::Points,
            timeframe: Timeframe::Weekly,
            scope: LeaderboardScope::default(),
            custom_logic: None,
            display_limit: 10,
            refresh_interval: 3600,
            created_at: String::new(),
            updated_at: String::new(),
        };
        let err = validate_leaderboard(&board).unwrap_err();
        assert_eq!(err.to_string(), "Tenant is required when leaderboard is not global");

        board.is_global = true;
        assert!(validate_leaderboard(&board).is_ok());

        board.display_limit = 101;
        assert!(validate_leaderboard(&board).is_err());
        board.display_limit = 100;
        board.refresh_interval = 299;
        assert!(validate_leaderboard(&board).is_err());
    }
}
