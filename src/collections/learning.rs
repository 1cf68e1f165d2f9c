use chrono::Utc;
use lms_common::models::{
    CompletionCriteria, CompletionCriteriaType, Course, CourseSettings, Duration, Enrollment,
    EnrollmentSettings, EnrollmentStatus, Lesson, LessonContent, LessonType, Module, Progress,
    ProgressStatus, PublishStatus, Role, Schedule,
};
use lms_common::time::now_ts;
use serde::Deserialize;
use tracing::{debug, info};

use super::{Document, ensure_own_tenant, ensure_unchanged, require_text};
use crate::access::{self, AuthUser, Collection, Operation};
use crate::context::Ctx;
use crate::db::LmsDb;
use crate::errors::{LmsError, LmsResult};
use crate::hooks;

/// Instructors may only build on courses they teach.
fn ensure_teaches(user: &AuthUser, course: &Course) -> LmsResult<()> {
    if user.role == Role::Instructor && course.instructor_id != user.id {
        return Err(LmsError::Forbidden);
    }
    Ok(())
}

fn existing_course(db: &LmsDb, id: i64) -> LmsResult<Course> {
    db.get::<Course>(id)?
        .ok_or_else(|| LmsError::validation(format!("Course {id} does not exist")))
}

// ── Courses ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CourseInput {
    pub title: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tenant_id: Option<i64>,
    #[serde(default)]
    pub is_global: bool,
    #[serde(default)]
    pub instructor_id: Option<i64>,
    #[serde(default)]
    pub thumbnail_id: Option<i64>,
    #[serde(default)]
    pub status: Option<PublishStatus>,
    #[serde(default)]
    pub duration: Duration,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub settings: CourseSettings,
    #[serde(default)]
    pub enrollment: EnrollmentSettings,
    #[serde(default)]
    pub prerequisites: Vec<i64>,
}

impl Document for Course {
    type Input = CourseInput;

    fn build(input: CourseInput, user: &AuthUser, now: &str) -> LmsResult<Self> {
        let instructor_id = match (input.instructor_id, user.role) {
            (Some(id), _) => id,
            (None, Role::Instructor) => user.id,
            (None, _) => return Err(LmsError::validation("Instructor is required")),
        };
        let slug = input
            .slug
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| hooks::course_slug(&input.title));
        Ok(Course {
            id: 0,
            slug,
            title: input.title,
            description: input.description,
            tenant_id: hooks::resolve_tenant(input.tenant_id, input.is_global, user),
            is_global: input.is_global,
            instructor_id,
            thumbnail_id: input.thumbnail_id,
            status: input.status.unwrap_or(PublishStatus::Draft),
            duration: input.duration,
            schedule: input.schedule,
            settings: input.settings,
            enrollment: input.enrollment,
            prerequisites: input.prerequisites,
            created_at: now.to_string(),
            updated_at: now.to_string(),
            published_at: None,
        })
    }

    fn before_change(&mut self, ctx: Ctx<'_>, user: &AuthUser, previous: Option<&Self>) -> LmsResult<()> {
        require_text(&self.title, "Title")?;
        if self.slug.trim().is_empty() {
            self.slug = hooks::course_slug(&self.title);
        }
        if self.is_global {
            self.tenant_id = None;
        }
        hooks::validate_duration(&self.duration)?;

        match previous {
            None => {
                ensure_own_tenant(user, self.tenant_id)?;
                if user.role == Role::Instructor && self.instructor_id != user.id {
                    return Err(LmsError::Forbidden);
                }
            }
            Some(previous) => {
                ensure_unchanged(user, &previous.instructor_id, &self.instructor_id)?;
                ensure_unchanged(user, &previous.tenant_id, &self.tenant_id)?;
            }
        }

        for &id in &self.prerequisites {
            if id == self.id {
                return Err(LmsError::validation("A course cannot be its own prerequisite"));
            }
            existing_course(ctx.db, id)?;
        }

        let now = now_ts();
        if self.status == PublishStatus::Published && self.published_at.is_none() {
            self.published_at = Some(now.clone());
        }
        self.updated_at = now;
        Ok(())
    }
}

// ── Modules ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ModuleInput {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub course_id: i64,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub status: Option<PublishStatus>,
    #[serde(default)]
    pub duration: Duration,
    #[serde(default)]
    pub completion_criteria: CompletionCriteria,
}

impl Document for Module {
    type Input = ModuleInput;

    fn build(input: ModuleInput, _user: &AuthUser, now: &str) -> LmsResult<Self> {
        Ok(Module {
            id: 0,
            title: input.title,
            description: input.description,
            course_id: input.course_id,
            order: input.order,
            status: input.status.unwrap_or(PublishStatus::Draft),
            duration: input.duration,
            completion_criteria: input.completion_criteria,
            created_at: now.to_string(),
            updated_at: now.to_string(),
        })
    }

    fn before_change(&mut self, ctx: Ctx<'_>, user: &AuthUser, previous: Option<&Self>) -> LmsResult<()> {
        require_text(&self.title, "Title")?;
        hooks::validate_duration(&self.duration)?;
        let criteria = &self.completion_criteria;
        if criteria.criteria_type == CompletionCriteriaType::MinScore
            && !criteria.minimum_score.is_some_and(|s| s <= 100)
        {
            return Err(LmsError::validation(
                "Minimum score between 0 and 100 is required",
            ));
        }
        if let Some(previous) = previous {
            ensure_unchanged(user, &previous.course_id, &self.course_id)?;
        }
        let course = existing_course(ctx.db, self.course_id)?;
        ensure_teaches(user, &course)?;
        self.updated_at = now_ts();
        Ok(())
    }
}

// ── Lessons ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LessonInput {
    pub title: String,
    pub module_id: i64,
    #[serde(default)]
    pub order: i64,
    pub lesson_type: LessonType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<PublishStatus>,
    #[serde(default)]
    pub content: Option<LessonContent>,
}

impl Document for Lesson {
    type Input = LessonInput;

    fn build(input: LessonInput, _user: &AuthUser, now: &str) -> LmsResult<Self> {
        Ok(Lesson {
            id: 0,
            title: input.title,
            module_id: input.module_id,
            order: input.order,
            lesson_type: input.lesson_type,
            description: input.description,
            status: input.status.unwrap_or(PublishStatus::Draft),
            content: input.content,
            created_at: now.to_string(),
            updated_at: now.to_string(),
        })
    }

    fn before_change(&mut self, ctx: Ctx<'_>, user: &AuthUser, previous: Option<&Self>) -> LmsResult<()> {
        require_text(&self.title, "Title")?;
        if let Some(content) = &self.content {
            if content.lesson_type() != self.lesson_type {
                return Err(LmsError::validation(format!(
                    "Lesson content is {} but the lesson type is {}",
                    content.lesson_type(),
                    self.lesson_type
                )));
            }
        }
        if let Some(previous) = previous {
            ensure_unchanged(user, &previous.module_id, &self.module_id)?;
        }
        let module = ctx
            .db
            .get::<Module>(self.module_id)?
            .ok_or_else(|| LmsError::validation(format!("Module {} does not exist", self.module_id)))?;
        let course = existing_course(ctx.db, module.course_id)?;
        ensure_teaches(user, &course)?;
        self.updated_at = now_ts();
        Ok(())
    }
}

// ── Enrollments ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct EnrollmentInput {
    #[serde(default)]
    pub student_id: Option<i64>,
    pub course_id: i64,
    #[serde(default)]
    pub status: Option<EnrollmentStatus>,
    #[serde(default)]
    pub expires_at: Option<String>,
}

impl Document for Enrollment {
    type Input = EnrollmentInput;

    fn build(input: EnrollmentInput, user: &AuthUser, now: &str) -> LmsResult<Self> {
        let student_id = match (input.student_id, user.role) {
            (Some(id), _) => id,
            (None, Role::Student) => user.id,
            (None, _) => return Err(LmsError::validation("Student is required")),
        };
        Ok(Enrollment {
            id: 0,
            student_id,
            course_id: input.course_id,
            status: input.status.unwrap_or(EnrollmentStatus::Active),
            enrolled_at: now.to_string(),
            started_at: None,
            completed_at: None,
            dropped_at: None,
            expires_at: input.expires_at,
            is_active: true,
            created_at: now.to_string(),
            updated_at: now.to_string(),
        })
    }

    fn before_change(&mut self, ctx: Ctx<'_>, user: &AuthUser, previous: Option<&Self>) -> LmsResult<()> {
        let now = now_ts();
        hooks::normalize_enrollment_times(self)?;
        match previous {
            None => {
                self.enrolled_at = now.clone();
                check_new_enrollment(ctx.db, user, self)?;
            }
            Some(previous) => {
                ensure_unchanged(user, &previous.student_id, &self.student_id)?;
                ensure_unchanged(user, &previous.course_id, &self.course_id)?;
                if previous.status != self.status {
                    hooks::stamp_enrollment_status(self, &now);
                    self.is_active = self.status != EnrollmentStatus::Dropped;
                }
            }
        }
        self.updated_at = now;
        Ok(())
    }

    fn after_change(&self, ctx: Ctx<'_>, _user: &AuthUser, previous: Option<&Self>) -> LmsResult<()> {
        if previous.is_some() {
            return Ok(());
        }
        if ctx.db.progress_for(self.student_id, self.course_id)?.is_some() {
            debug!(student_id = self.student_id, course_id = self.course_id, "progress already exists");
            return Ok(());
        }
        let now = now_ts();
        ctx.db
            .create(&Progress {
                id: 0,
                student_id: self.student_id,
                course_id: self.course_id,
                status: ProgressStatus::NotStarted,
                overall_progress: 0,
                points_earned: 0,
                total_points: 0,
                is_global: false,
                completed_lessons: vec![],
                module_progress: vec![],
                quiz_attempts: vec![],
                discussions: vec![],
                assignments: vec![],
                started_at: now.clone(),
                completed_at: None,
                last_accessed: now.clone(),
                created_at: now.clone(),
                updated_at: now,
            })
            .map_err(LmsError::from_storage)?;
        info!(student_id = self.student_id, course_id = self.course_id, "initial progress created");
        Ok(())
    }
}

/// Enrollment rules: the course is visible to the caller, students enroll
/// only themselves and only where allowed, within the enrollment window,
/// below capacity, and after completing every prerequisite course.
fn check_new_enrollment(db: &LmsDb, user: &AuthUser, enrollment: &Enrollment) -> LmsResult<()> {
    let scope = access::require(Collection::Courses, Operation::Read, Some(user))?;
    let course = db
        .get_in_scope::<Course>(enrollment.course_id, scope)?
        .ok_or(LmsError::not_found("Course", enrollment.course_id))?;

    if user.role == Role::Student {
        if enrollment.student_id != user.id {
            return Err(LmsError::Forbidden);
        }
        if !course.enrollment.allow_self_enrollment {
            return Err(LmsError::validation(
                "Self-enrollment is not allowed for this course",
            ));
        }
    }

    let now = Utc::now();
    if course.enrollment.enrollment_start.is_some_and(|start| now < start)
        || course.enrollment.enrollment_end.is_some_and(|end| now > end)
    {
        return Err(LmsError::validation("Enrollment is not open for this course"));
    }

    let already = db.count::<Enrollment>(
        &crate::db::Filters::new()
            .eq("student_id", enrollment.student_id)
            .eq("course_id", enrollment.course_id)
            .clause("status != ?", EnrollmentStatus::Dropped.as_str().to_string()),
    )?;
    if already > 0 {
        return Err(LmsError::Conflict(
            "Student is already enrolled in this course".to_string(),
        ));
    }

    let capacity = i64::from(course.enrollment.capacity);
    if capacity > 0 && db.count_active_enrollments(course.id)? >= capacity {
        return Err(LmsError::Conflict(
            "Course has reached maximum enrollment capacity".to_string(),
        ));
    }

    if course.enrollment.require_prerequisite_completion {
        for &prerequisite in &course.prerequisites {
            if !db.has_completed_enrollment(enrollment.student_id, prerequisite)? {
                return Err(LmsError::validation(
                    "All prerequisite courses must be completed before enrolling",
                ));
            }
        }
    }
    Ok(())
}

// ── Progress ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ProgressInput {
    pub student_id: i64,
    pub course_id: i64,
    #[serde(default)]
    pub status: Option<ProgressStatus>,
    #[serde(default)]
    pub overall_progress: i64,
    #[serde(default)]
    pub is_global: bool,
}

impl Document for Progress {
    type Input = ProgressInput;

    fn build(input: ProgressInput, _user: &AuthUser, now: &str) -> LmsResult<Self> {
        Ok(Progress {
            id: 0,
            student_id: input.student_id,
            course_id: input.course_id,
            status: input.status.unwrap_or(ProgressStatus::NotStarted),
            overall_progress: input.overall_progress,
            points_earned: 0,
            total_points: 0,
            is_global: input.is_global,
            completed_lessons: vec![],
            module_progress: vec![],
            quiz_attempts: vec![],
            discussions: vec![],
            assignments: vec![],
            started_at: now.to_string(),
            completed_at: None,
            last_accessed: now.to_string(),
            created_at: now.to_string(),
            updated_at: now.to_string(),
        })
    }

    fn before_change(&mut self, _ctx: Ctx<'_>, user: &AuthUser, previous: Option<&Self>) -> LmsResult<()> {
        if let Some(previous) = previous {
            ensure_unchanged(user, &previous.student_id, &self.student_id)?;
            ensure_unchanged(user, &previous.course_id, &self.course_id)?;
            // Point totals follow the ledger.
            if !access::is_admin(Some(user)) {
                self.points_earned = previous.points_earned;
                self.total_points = previous.total_points;
            }
        }
        hooks::normalize_progress_times(self)?;
        hooks::touch_progress(self, &now_ts());
        Ok(())
    }
}
