//! Leaderboard rankings computed on demand.

use chrono::{DateTime, Utc};
use lms_common::models::{Leaderboard, LeaderboardType, User};
use lms_common::time::{format_ts, timeframe_start};
use serde::Serialize;

use crate::access::{self, AuthUser, Collection, Operation};
use crate::collections;
use crate::db::{Filters, LmsDb};
use crate::errors::{LmsError, LmsResult};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Ranking {
    pub rank: usize,
    pub user_id: i64,
    pub name: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Rankings {
    pub leaderboard: Leaderboard,
    pub generated_at: String,
    pub rankings: Vec<Ranking>,
}

fn candidates(db: &LmsDb, board: &Leaderboard) -> LmsResult<Vec<User>> {
    let mut filters = Filters::new();
    if !board.is_global {
        match board.tenant_id {
            Some(t) => filters = filters.eq("tenant_id", t),
            None => return Ok(Vec::new()),
        }
    }
    if let Some(course_id) = board.scope.course_id {
        filters = filters.clause(
            "id IN (SELECT student_id FROM enrollments WHERE course_id = ?)",
            course_id,
        );
    }
    Ok(db.find_all::<User>(&filters, "id")?)
}

fn score(db: &LmsDb, board: &Leaderboard, user_id: i64, since: &str) -> LmsResult<f64> {
    match board.board_type {
        LeaderboardType::Points => {
            Ok(db.sum_points_since(user_id, since, board.scope.point_type.point_type())? as f64)
        }
        LeaderboardType::Progress => {
            let records: Vec<i64> = db
                .progress_records(user_id)?
                .into_iter()
                .filter(|p| board.scope.course_id.is_none_or(|c| p.course_id == c))
                .map(|p| p.overall_progress)
                .collect();
            if records.is_empty() {
                Ok(0.0)
            } else {
                Ok(records.iter().sum::<i64>() as f64 / records.len() as f64)
            }
        }
        LeaderboardType::Achievements => Ok(db.count_unlocked_since(
            user_id,
            since,
            board.scope.achievement_type.achievement_type(),
        )? as f64),
        LeaderboardType::Custom => Err(LmsError::validation(
            "Custom leaderboards cannot be ranked",
        )),
    }
}

/// Rank the board's users by score, highest first. Users with a zero score
/// are left out and tied scores share a rank.
pub fn rankings(db: &LmsDb, board: &Leaderboard, now: DateTime<Utc>) -> LmsResult<Vec<Ranking>> {
    if board.board_type == LeaderboardType::Custom {
        return Err(LmsError::validation("Custom leaderboards cannot be ranked"));
    }
    let since = format_ts(&timeframe_start(board.timeframe, now));

    let mut scored = Vec::new();
    for user in candidates(db, board)? {
        let s = score(db, board, user.id, &since)?;
        if s > 0.0 {
            scored.push((user, s));
        }
    }
    scored.sort_by(|(a, sa), (b, sb)| sb.total_cmp(sa).then(a.id.cmp(&b.id)));
    scored.truncate(usize::try_from(board.display_limit).unwrap_or(0));

    let mut out: Vec<Ranking> = Vec::with_capacity(scored.len());
    for (i, (user, s)) in scored.into_iter().enumerate() {
        let rank = match out.last() {
            Some(prev) if prev.score == s => prev.rank,
            _ => i + 1,
        };
        out.push(Ranking {
            rank,
            user_id: user.id,
            name: user.name,
            score: s,
        });
    }
    Ok(out)
}

/// Rankings of a leaderboard visible to the caller.
pub fn leaderboard_rankings(
    db: &LmsDb,
    user: &AuthUser,
    id: i64,
    now: DateTime<Utc>,
) -> LmsResult<Rankings> {
    let scope = access::require(Collection::Leaderboards, Operation::Read, Some(user))?;
    let leaderboard = collections::load_scoped::<Leaderboard>(db, id, scope)?;
    let rankings = rankings(db, &leaderboard, now)?;
    Ok(Rankings {
        leaderboard,
        generated_at: format_ts(&now),
        rankings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures::*;
    use anyhow::Result;
    use lms_common::models::{
        EnrollmentStatus, LeaderboardScope, Point, PointSource, PointSourceRef, PointType,
        PointTypeFilter, Role, Timeframe,
    };
    use lms_common::time::parse_ts;

    fn board(tenant_id: Option<i64>, board_type: LeaderboardType, timeframe: Timeframe) -> Leaderboard {
        Leaderboard {
            id: 0,
            name: "Top".to_string(),
            tenant_id,
            is_global: tenant_id.is_none(),
            board_type,
            timeframe,
            scope: LeaderboardScope::default(),
            custom_logic: None,
            display_limit: 10,
            refresh_interval: 3600,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn give(db: &LmsDb, student_id: i64, point_type: PointType, amount: i64, at: &str) -> Result<()> {
        db.create(&Point {
            id: 0,
            student_id,
            point_type,
            amount,
            source: PointSourceRef {
                source_type: PointSource::Lessons,
                id: 1,
            },
            metadata: None,
            created_at: at.to_string(),
        })?;
        Ok(())
    }

    const NOW: &str = "2024-05-01T12:00:00Z";

    #[test]
    fn test_points_ranking_shares_ranks_and_skips_zero() -> Result<()> {
        let db = LmsDb::new_in_memory()?;
        let t = tenant(&db, "acme")?;
        let a = user(&db, "a@acme.test", Role::Student, Some(t.id))?;
        let b = user(&db, "b@acme.test", Role::Student, Some(t.id))?;
        let c = user(&db, "c@acme.test", Role::Student, Some(t.id))?;
        let _idle = user(&db, "d@acme.test", Role::Student, Some(t.id))?;
        give(&db, a.id, PointType::LessonComplete, 10, "2024-04-30T00:00:00Z")?;
        give(&db, b.id, PointType::QuizScore, 30, "2024-04-30T00:00:00Z")?;
        give(&db, c.id, PointType::LessonComplete, 30, "2024-04-30T00:00:00Z")?;

        let ranked = rankings(&db, &board(Some(t.id), LeaderboardType::Points, Timeframe::AllTime), parse_ts(NOW)?)?;
        let summary: Vec<(usize, i64)> = ranked.iter().map(|r| (r.rank, r.user_id)).collect();
        assert_eq!(summary, vec![(1, b.id), (1, c.id), (3, a.id)]);
        Ok(())
    }

    #[test]
    fn test_points_filter_and_window() -> Result<()> {
        let db = LmsDb::new_in_memory()?;
        let t = tenant(&db, "acme")?;
        let a = user(&db, "a@acme.test", Role::Student, Some(t.id))?;
        let b = user(&db, "b@acme.test", Role::Student, Some(t.id))?;
        give(&db, a.id, PointType::LessonComplete, 50, "2024-03-01T00:00:00Z")?;
        give(&db, a.id, PointType::QuizScore, 5, "2024-04-30T00:00:00Z")?;
        give(&db, b.id, PointType::LessonComplete, 20, "2024-04-29T00:00:00Z")?;

        let mut weekly = board(Some(t.id), LeaderboardType::Points, Timeframe::Weekly);
        let ranked = rankings(&db, &weekly, parse_ts(NOW)?)?;
        assert_eq!(ranked[0].user_id, b.id);
        assert_eq!(ranked[1].score, 5.0);

        weekly.scope.point_type = PointTypeFilter::Lesson;
        let ranked = rankings(&db, &weekly, parse_ts(NOW)?)?;
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].user_id, b.id);
        Ok(())
    }

    #[test]
    fn test_points_at_window_start_are_excluded() -> Result<()> {
        let db = LmsDb::new_in_memory()?;
        let t = tenant(&db, "acme")?;
        let a = user(&db, "a@acme.test", Role::Student, Some(t.id))?;
        let b = user(&db, "b@acme.test", Role::Student, Some(t.id))?;
        // The week containing NOW opens on Sunday 2024-04-28.
        give(&db, a.id, PointType::LessonComplete, 40, "2024-04-28T00:00:00Z")?;
        give(&db, b.id, PointType::LessonComplete, 10, "2024-04-28T00:00:01Z")?;

        let ranked = rankings(&db, &board(Some(t.id), LeaderboardType::Points, Timeframe::Weekly), parse_ts(NOW)?)?;
        assert_eq!(ranked.len(), 1);
        assert_eq!((ranked[0].user_id, ranked[0].score), (b.id, 10.0));
        Ok(())
    }

    #[test]
    fn test_other_tenant_board_is_forbidden() -> Result<()> {
        let db = LmsDb::new_in_memory()?;
        let t = tenant(&db, "acme")?;
        let other = tenant(&db, "other")?;
        let s = user(&db, "s@acme.test", Role::Student, Some(t.id))?;
        let theirs = db.create(&board(Some(other.id), LeaderboardType::Points, Timeframe::AllTime))?;
        let caller = AuthUser {
            id: s.id,
            role: s.role,
            tenant_id: s.tenant_id,
        };
        let now = parse_ts(NOW)?;

        let err = leaderboard_rankings(&db, &caller, theirs.id, now).unwrap_err();
        assert!(matches!(err, LmsError::Forbidden));
        let err = leaderboard_rankings(&db, &caller, 9999, now).unwrap_err();
        assert!(matches!(err, LmsError::NotFound { .. }));
        Ok(())
    }

    #[test]
    fn test_tenant_board_excludes_other_tenants_and_truncates() -> Result<()> {
        let db = LmsDb::new_in_memory()?;
        let t = tenant(&db, "acme")?;
        let other = tenant(&db, "other")?;
        let mut ids = Vec::new();
        for n in 0..4 {
            let u = user(&db, &format!("u{n}@acme.test"), Role::Student, Some(t.id))?;
            give(&db, u.id, PointType::LessonComplete, 10 * (n + 1), "2024-04-30T00:00:00Z")?;
            ids.push(u.id);
        }
        let outsider = user(&db, "x@other.test", Role::Student, Some(other.id))?;
        give(&db, outsider.id, PointType::LessonComplete, 999, "2024-04-30T00:00:00Z")?;

        let mut b = board(Some(t.id), LeaderboardType::Points, Timeframe::AllTime);
        b.display_limit = 2;
        let ranked = rankings(&db, &b, parse_ts(NOW)?)?;
        assert_eq!(ranked.iter().map(|r| r.user_id).collect::<Vec<_>>(), vec![ids[3], ids[2]]);

        let global = rankings(&db, &board(None, LeaderboardType::Points, Timeframe::AllTime), parse_ts(NOW)?)?;
        assert_eq!(global[0].user_id, outsider.id);
        Ok(())
    }

    #[test]
    fn test_progress_board_restricted_to_course() -> Result<()> {
        let db = LmsDb::new_in_memory()?;
        let t = tenant(&db, "acme")?;
        let i = user(&db, "i@acme.test", Role::Instructor, Some(t.id))?;
        let a = user(&db, "a@acme.test", Role::Student, Some(t.id))?;
        let b = user(&db, "b@acme.test", Role::Student, Some(t.id))?;
        let c1 = course(&db, "One", Some(t.id), i.id)?;
        let c2 = course(&db, "Two", Some(t.id), i.id)?;
        enrollment(&db, a.id, c1.id, EnrollmentStatus::Active)?;
        let mut pa = progress(&db, a.id, c1.id)?;
        pa.overall_progress = 40;
        db.save(&pa)?;
        let mut pb = progress(&db, b.id, c2.id)?;
        pb.overall_progress = 90;
        db.save(&pb)?;

        let mut board = board(Some(t.id), LeaderboardType::Progress, Timeframe::AllTime);
        board.scope.course_id = Some(c1.id);
        let ranked = rankings(&db, &board, parse_ts(NOW)?)?;
        assert_eq!(ranked.len(), 1);
        assert_eq!((ranked[0].user_id, ranked[0].score), (a.id, 40.0));
        Ok(())
    }

    #[test]
    fn test_custom_board_is_rejected() -> Result<()> {
        let db = LmsDb::new_in_memory()?;
        let err = rankings(&db, &board(None, LeaderboardType::Custom, Timeframe::AllTime), parse_ts(NOW)?).unwrap_err();
        assert!(matches!(err, LmsError::Validation(_)));
        Ok(())
    }
}
