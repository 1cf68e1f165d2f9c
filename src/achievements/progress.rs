//! Per-type progress metrics.

use chrono::{DateTime, Utc};
use lms_common::models::{AchievementType, Metric, Progress, Timeframe};
use lms_common::time::{parse_ts, timeframe_start};

use crate::db::LmsDb;
use crate::errors::{LmsError, LmsResult};

fn mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, n) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}

fn unsupported(achievement_type: AchievementType, metric: Metric) -> LmsError {
    LmsError::UnsupportedMetric {
        achievement_type: achievement_type.as_str(),
        metric: metric.as_str(),
    }
}

/// Current value of `metric` for a student, counting only events after the
/// start of `timeframe`. Streak progress ignores the timeframe.
pub fn get_progress(
    db: &LmsDb,
    user_id: i64,
    achievement_type: AchievementType,
    metric: Metric,
    timeframe: Timeframe,
    now: DateTime<Utc>,
) -> LmsResult<f64> {
    let start = timeframe_start(timeframe, now);

    match achievement_type {
        AchievementType::CourseProgress => {
            let completed: Vec<Progress> = db
                .progress_records(user_id)?
                .into_iter()
                .filter(|p| {
                    p.completed_at
                        .as_deref()
                        .and_then(|at| parse_ts(at).ok())
                        .is_some_and(|at| at > start)
                })
                .collect();
            match metric {
                Metric::Count => Ok(completed.len() as f64),
                Metric::Score => Ok(mean(completed.iter().map(|p| p.overall_progress as f64))),
                other => Err(unsupported(achievement_type, other)),
            }
        }
        AchievementType::QuizScore => {
            let records = db.progress_records(user_id)?;
            let scores: Vec<f64> = records
                .iter()
                .flat_map(|p| &p.quiz_attempts)
                .filter(|a| a.completed_at > start)
                .map(|a| a.score)
                .collect();
            match metric {
                Metric::Count => Ok(scores.len() as f64),
                Metric::Score => Ok(mean(scores)),
                other => Err(unsupported(achievement_type, other)),
            }
        }
        AchievementType::Assignment => {
            let records = db.progress_records(user_id)?;
            let submissions: Vec<_> = records
                .iter()
                .flat_map(|p| &p.assignments)
                .filter(|s| s.submitted_at > start)
                .collect();
            match metric {
                Metric::Count => Ok(submissions.len() as f64),
                Metric::Score => Ok(mean(submissions.iter().filter_map(|s| s.grade))),
                other => Err(unsupported(achievement_type, other)),
            }
        }
        AchievementType::Streak => {
            let streak = db.first_streak(user_id)?;
            match metric {
                Metric::Count => Ok(streak.map_or(0.0, |s| s.current_streak as f64)),
                Metric::Duration => Ok(streak.map_or(0.0, |s| s.longest_streak as f64)),
                other => Err(unsupported(achievement_type, other)),
            }
        }
        AchievementType::Discussion => match metric {
            Metric::Count => {
                let records = db.progress_records(user_id)?;
                let n = records
                    .iter()
                    .flat_map(|p| &p.discussions)
                    .filter(|d| d.participated_at > start)
                    .count();
                Ok(n as f64)
            }
            other => Err(unsupported(achievement_type, other)),
        },
        AchievementType::Custom => Err(LmsError::CustomProgress),
    }
}
