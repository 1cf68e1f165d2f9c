//! Student activity on a progress record.
//!
//! Each activity runs in one transaction: the progress document is
//! updated, a streak tick of the matching type is recorded and, for a
//! first lesson completion, `lesson_complete` points are awarded.

use chrono::{DateTime, Utc};
use lms_common::models::{
    ActivityKind, AssignmentSubmission, DiscussionEntry, Enrollment, EnrollmentStatus, Module,
    ModuleProgress, PointSource, PointSourceRef, PointType, Progress, ProgressStatus,
    QuizAttempt, Role, StreakType,
};
use lms_common::time::format_ts;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::access::{self, AuthUser, Collection, Operation};
use crate::collections::load_scoped;
use crate::context::Ctx;
use crate::db::{Filters, LmsDb};
use crate::errors::{LmsError, LmsResult};
use crate::hooks;
use crate::points::{self, PointAward};
use crate::streaks::{self, Activity};

#[derive(Debug, Clone, Deserialize)]
pub struct QuizAttemptInput {
    pub lesson_id: i64,
    pub score: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscussionInput {
    pub lesson_id: i64,
}

/// A submission, or a grade for an existing one when `grade` is set.
#[derive(Debug, Clone, Deserialize)]
pub struct AssignmentInput {
    pub lesson_id: i64,
    #[serde(default)]
    pub grade: Option<f64>,
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModuleProgressInput {
    pub module_id: i64,
    pub status: ProgressStatus,
    #[serde(default)]
    pub progress: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompleteLessonInput {
    pub lesson_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LessonCompletion {
    pub progress: Progress,
    /// False when the lesson was already complete.
    pub newly_completed: bool,
    pub points_awarded: i64,
}

fn lesson_activity(lesson_id: i64, points: i64) -> Activity {
    Activity {
        kind: ActivityKind::Lesson,
        id: lesson_id,
        points,
    }
}

/// Load a progress record the caller may update.
fn load_progress(db: &LmsDb, user: &AuthUser, progress_id: i64) -> LmsResult<Progress> {
    let scope = access::require(Collection::Progress, Operation::Update, Some(user))?;
    load_scoped::<Progress>(db, progress_id, scope)
}

fn ensure_lesson_in_course(db: &LmsDb, lesson_id: i64, course_id: i64) -> LmsResult<()> {
    match db.course_for_lesson(lesson_id)? {
        Some(c) if c == course_id => Ok(()),
        Some(_) => Err(LmsError::validation(format!(
            "Lesson {lesson_id} is not part of course {course_id}"
        ))),
        None => Err(LmsError::not_found("Lesson", lesson_id)),
    }
}

fn mark_started(progress: &mut Progress) {
    if progress.status == ProgressStatus::NotStarted {
        progress.status = ProgressStatus::InProgress;
    }
}

/// Save `progress`, tick the streak and commit, all in one transaction.
fn commit_activity(
    ctx: Ctx<'_>,
    mut progress: Progress,
    streak_type: StreakType,
    activity: Activity,
    at: DateTime<Utc>,
) -> LmsResult<Progress> {
    hooks::touch_progress(&mut progress, &format_ts(&at));
    ctx.transaction(|ctx| {
        let saved = ctx.db.save(&progress).map_err(LmsError::from_storage)?;
        streaks::record_activity(ctx, saved.student_id, streak_type, activity, at)?;
        Ok(saved)
    })
}

pub fn record_quiz_attempt(
    ctx: Ctx<'_>,
    user: &AuthUser,
    progress_id: i64,
    input: QuizAttemptInput,
) -> LmsResult<Progress> {
    if !(0.0..=100.0).contains(&input.score) {
        return Err(LmsError::validation("Quiz score must be between 0 and 100"));
    }
    let mut progress = load_progress(ctx.db, user, progress_id)?;
    ensure_lesson_in_course(ctx.db, input.lesson_id, progress.course_id)?;

    let at = Utc::now();
    progress.quiz_attempts.push(QuizAttempt {
        lesson_id: input.lesson_id,
        score: input.score,
        completed_at: at,
    });
    mark_started(&mut progress);
    debug!(progress_id, lesson_id = input.lesson_id, score = input.score, "quiz attempt");
    commit_activity(ctx, progress, StreakType::Quiz, lesson_activity(input.lesson_id, 0), at)
}

pub fn record_discussion(
    ctx: Ctx<'_>,
    user: &AuthUser,
    progress_id: i64,
    input: DiscussionInput,
) -> LmsResult<Progress> {
    let mut progress = load_progress(ctx.db, user, progress_id)?;
    ensure_lesson_in_course(ctx.db, input.lesson_id, progress.course_id)?;

    let at = Utc::now();
    progress.discussions.push(DiscussionEntry {
        lesson_id: input.lesson_id,
        participated_at: at,
    });
    mark_started(&mut progress);
    commit_activity(ctx, progress, StreakType::Progress, lesson_activity(input.lesson_id, 0), at)
}

/// Submit an assignment, or grade the existing submission. Only admins and
/// instructors grade.
pub fn record_assignment(
    ctx: Ctx<'_>,
    user: &AuthUser,
    progress_id: i64,
    input: AssignmentInput,
) -> LmsResult<Progress> {
    let mut progress = load_progress(ctx.db, user, progress_id)?;
    ensure_lesson_in_course(ctx.db, input.lesson_id, progress.course_id)?;
    let at = Utc::now();

    match input.grade {
        Some(grade) => {
            if user.role == Role::Student {
                return Err(LmsError::Forbidden);
            }
            if !(0.0..=100.0).contains(&grade) {
                return Err(LmsError::validation("Grade must be between 0 and 100"));
            }
            let submission = progress
                .assignments
                .iter_mut()
                .rev()
                .find(|a| a.lesson_id == input.lesson_id)
                .ok_or_else(|| {
                    LmsError::validation(format!(
                        "No submission for lesson {} to grade",
                        input.lesson_id
                    ))
                })?;
            submission.grade = Some(grade);
            submission.feedback = input.feedback;
            submission.graded_at = Some(at);
            info!(progress_id, lesson_id = input.lesson_id, grade, "assignment graded");
            // Grading is not student activity.
            hooks::touch_progress(&mut progress, &format_ts(&at));
            return ctx.db.save(&progress).map_err(LmsError::from_storage);
        }
        None => {
            progress.assignments.push(AssignmentSubmission {
                lesson_id: input.lesson_id,
                grade: None,
                feedback: input.feedback,
                submitted_at: at,
                graded_at: None,
            });
            mark_started(&mut progress);
        }
    }
    commit_activity(ctx, progress, StreakType::Assignment, lesson_activity(input.lesson_id, 0), at)
}

pub fn record_module_progress(
    ctx: Ctx<'_>,
    user: &AuthUser,
    progress_id: i64,
    input: ModuleProgressInput,
) -> LmsResult<Progress> {
    if input.progress > 100 {
        return Err(LmsError::validation("Module progress must be between 0 and 100"));
    }
    let mut progress = load_progress(ctx.db, user, progress_id)?;
    let module = ctx
        .db
        .get::<Module>(input.module_id)?
        .ok_or(LmsError::not_found("Module", input.module_id))?;
    if module.course_id != progress.course_id {
        return Err(LmsError::validation(format!(
            "Module {} is not part of course {}",
            module.id, progress.course_id
        )));
    }

    let entry = ModuleProgress {
        module_id: module.id,
        status: input.status,
        progress: input.progress,
    };
    match progress.module_progress.iter_mut().find(|m| m.module_id == module.id) {
        Some(existing) => *existing = entry,
        None => progress.module_progress.push(entry),
    }
    mark_started(&mut progress);

    let activity = Activity {
        kind: ActivityKind::Module,
        id: module.id,
        points: 0,
    };
    commit_activity(ctx, progress, StreakType::Progress, activity, Utc::now())
}

/// Percentage of the course's lessons completed, rounded down.
pub fn overall_progress(completed: usize, total: i64) -> i64 {
    if total <= 0 {
        return 0;
    }
    ((completed as i64 * 100) / total).min(100)
}

/// Mark a lesson complete. Completing the same lesson again changes
/// nothing and awards nothing.
pub fn complete_lesson(
    ctx: Ctx<'_>,
    user: &AuthUser,
    progress_id: i64,
    input: CompleteLessonInput,
) -> LmsResult<LessonCompletion> {
    let db = ctx.db;
    let mut progress = load_progress(db, user, progress_id)?;
    ensure_lesson_in_course(db, input.lesson_id, progress.course_id)?;
    if progress.completed_lessons.contains(&input.lesson_id) {
        debug!(progress_id, lesson_id = input.lesson_id, "lesson already completed");
        return Ok(LessonCompletion {
            progress,
            newly_completed: false,
            points_awarded: 0,
        });
    }

    let at = Utc::now();
    let now = format_ts(&at);
    progress.completed_lessons.push(input.lesson_id);
    let total = db.count_lessons_in_course(progress.course_id)?;
    progress.overall_progress = overall_progress(progress.completed_lessons.len(), total);
    if progress.overall_progress >= 100 {
        progress.status = ProgressStatus::Completed;
        if progress.completed_at.is_none() {
            progress.completed_at = Some(now.clone());
        }
    } else {
        progress.status = ProgressStatus::InProgress;
    }
    let amount = ctx.config.gamification.lesson_complete_points.max(0);

    hooks::touch_progress(&mut progress, &now);
    let saved = ctx.transaction(|ctx| {
        let saved = ctx.db.save(&progress).map_err(LmsError::from_storage)?;
        if saved.status == ProgressStatus::Completed {
            complete_enrollment(ctx.db, saved.student_id, saved.course_id, &now)?;
        }
        if amount > 0 {
            points::award_points(
                ctx,
                PointAward {
                    student_id: saved.student_id,
                    point_type: PointType::LessonComplete,
                    amount,
                    source: PointSourceRef {
                        source_type: PointSource::Lessons,
                        id: input.lesson_id,
                    },
                    metadata: Some(json!({ "course_id": saved.course_id })),
                },
            )?;
        }
        streaks::record_activity(
            ctx,
            saved.student_id,
            StreakType::Progress,
            lesson_activity(input.lesson_id, amount),
            at,
        )?;
        Ok(saved)
    })?;

    info!(
        progress_id,
        lesson_id = input.lesson_id,
        overall = saved.overall_progress,
        "lesson completed"
    );
    // Point awards moved the totals; return the stored record.
    let progress = db
        .get::<Progress>(saved.id)?
        .ok_or(LmsError::not_found("Progress", saved.id))?;
    Ok(LessonCompletion {
        progress,
        newly_completed: true,
        points_awarded: amount,
    })
}

/// A finished course completes the student's active enrollment.
fn complete_enrollment(db: &LmsDb, student_id: i64, course_id: i64, now: &str) -> LmsResult<()> {
    let active = db.find_one::<Enrollment>(
        &Filters::new()
            .eq("student_id", student_id)
            .eq("course_id", course_id)
            .eq("status", EnrollmentStatus::Active.as_str().to_string()),
    )?;
    if let Some(mut enrollment) = active {
        enrollment.status = EnrollmentStatus::Completed;
        hooks::stamp_enrollment_status(&mut enrollment, now);
        enrollment.updated_at = now.to_string();
        db.save(&enrollment).map_err(LmsError::from_storage)?;
        info!(student_id, course_id, "enrollment completed");
    }
    Ok(())
}
