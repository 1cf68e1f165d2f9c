//! Courses, modules, lessons, enrollments and progress.

use anyhow::{Context, Result};
use lms_common::models::{
    Course, Duration, Enrollment, EnrollmentStatus, Lesson, Module, Progress,
};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::{Filters, LmsDb, Record, enum_col, json_col, opt_json_col, to_json};
use crate::access::Collection;

impl Record for Course {
    const COLLECTION: Collection = Collection::Courses;
    const COLUMNS: &'static str = "id, title, slug, description, tenant_id, is_global, \
        instructor_id, thumbnail_id, status, duration_hours, duration_minutes, schedule, \
        settings, enrollment, prerequisites, created_at, updated_at, published_at";

    fn id(&self) -> i64 {
        self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Course {
            id: row.get(0)?,
            title: row.get(1)?,
            slug: row.get(2)?,
            description: row.get(3)?,
            tenant_id: row.get(4)?,
            is_global: row.get(5)?,
            instructor_id: row.get(6)?,
            thumbnail_id: row.get(7)?,
            status: enum_col(row, 8)?,
            duration: Duration {
                hours: row.get(9)?,
                minutes: row.get(10)?,
            },
            schedule: json_col(row, 11)?,
            settings: json_col(row, 12)?,
            enrollment: json_col(row, 13)?,
            prerequisites: json_col(row, 14)?,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
            published_at: row.get(17)?,
        })
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO courses (title, slug, description, tenant_id, is_global, instructor_id,
             thumbnail_id, status, duration_hours, duration_minutes, schedule, settings,
             enrollment, prerequisites, created_at, updated_at, published_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                self.title,
                self.slug,
                self.description,
                self.tenant_id,
                self.is_global,
                self.instructor_id,
                self.thumbnail_id,
                self.status.as_str(),
                self.duration.hours,
                self.duration.minutes,
                to_json(&self.schedule)?,
                to_json(&self.settings)?,
                to_json(&self.enrollment)?,
                to_json(&self.prerequisites)?,
                self.created_at,
                self.updated_at,
                self.published_at
            ],
        )
    }

    fn update(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE courses SET title = ?1, slug = ?2, description = ?3, tenant_id = ?4,
             is_global = ?5, instructor_id = ?6, thumbnail_id = ?7, status = ?8,
             duration_hours = ?9, duration_minutes = ?10, schedule = ?11, settings = ?12,
             enrollment = ?13, prerequisites = ?14, updated_at = ?15, published_at = ?16
             WHERE id = ?17",
            params![
                self.title,
                self.slug,
                self.description,
                self.tenant_id,
                self.is_global,
                self.instructor_id,
                self.thumbnail_id,
                self.status.as_str(),
                self.duration.hours,
                self.duration.minutes,
                to_json(&self.schedule)?,
                to_json(&self.settings)?,
                to_json(&self.enrollment)?,
                to_json(&self.prerequisites)?,
                self.updated_at,
                self.published_at,
                self.id
            ],
        )
    }
}

impl Record for Module {
    const COLLECTION: Collection = Collection::Modules;
    const COLUMNS: &'static str = "id, title, description, course_id, sort_order, status, \
        duration_hours, duration_minutes, completion_criteria, created_at, updated_at";

    fn id(&self) -> i64 {
        self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Module {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            course_id: row.get(3)?,
            order: row.get(4)?,
            status: enum_col(row, 5)?,
            duration: Duration {
                hours: row.get(6)?,
                minutes: row.get(7)?,
            },
            completion_criteria: json_col(row, 8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO modules (title, description, course_id, sort_order, status,
             duration_hours, duration_minutes, completion_criteria, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                self.title,
                self.description,
                self.course_id,
                self.order,
                self.status.as_str(),
                self.duration.hours,
                self.duration.minutes,
                to_json(&self.completion_criteria)?,
                self.created_at,
                self.updated_at
            ],
        )
    }

    fn update(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE modules SET title = ?1, description = ?2, course_id = ?3, sort_order = ?4,
             status = ?5, duration_hours = ?6, duration_minutes = ?7, completion_criteria = ?8,
             updated_at = ?9 WHERE id = ?10",
            params![
                self.title,
                self.description,
                self.course_id,
                self.order,
                self.status.as_str(),
                self.duration.hours,
                self.duration.minutes,
                to_json(&self.completion_criteria)?,
                self.updated_at,
                self.id
            ],
        )
    }
}

impl Record for Lesson {
    const COLLECTION: Collection = Collection::Lessons;
    const COLUMNS: &'static str = "id, title, module_id, sort_order, lesson_type, description, \
        status, content, created_at, updated_at";

    fn id(&self) -> i64 {
        self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Lesson {
            id: row.get(0)?,
            title: row.get(1)?,
            module_id: row.get(2)?,
            order: row.get(3)?,
            lesson_type: enum_col(row, 4)?,
            description: row.get(5)?,
            status: enum_col(row, 6)?,
            content: opt_json_col(row, 7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        let content = self.content.as_ref().map(to_json).transpose()?;
        conn.execute(
            "INSERT INTO lessons (title, module_id, sort_order, lesson_type, description, status,
             content, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                self.title,
                self.module_id,
                self.order,
                self.lesson_type.as_str(),
                self.description,
                self.status.as_str(),
                content,
                self.created_at,
                self.updated_at
            ],
        )
    }

    fn update(&self, conn: &Connection) -> rusqlite::Result<usize> {
        let content = self.content.as_ref().map(to_json).transpose()?;
        conn.execute(
            "UPDATE lessons SET title = ?1, module_id = ?2, sort_order = ?3, lesson_type = ?4,
             description = ?5, status = ?6, content = ?7, updated_at = ?8 WHERE id = ?9",
            params![
                self.title,
                self.module_id,
                self.order,
                self.lesson_type.as_str(),
                self.description,
                self.status.as_str(),
                content,
                self.updated_at,
                self.id
            ],
        )
    }
}

impl Record for Enrollment {
    const COLLECTION: Collection = Collection::Enrollments;
    const COLUMNS: &'static str = "id, student_id, course_id, status, enrolled_at, started_at, \
        completed_at, dropped_at, expires_at, is_active, created_at, updated_at";

    fn id(&self) -> i64 {
        self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Enrollment {
            id: row.get(0)?,
            student_id: row.get(1)?,
            course_id: row.get(2)?,
            status: enum_col(row, 3)?,
            enrolled_at: row.get(4)?,
            started_at: row.get(5)?,
            completed_at: row.get(6)?,
            dropped_at: row.get(7)?,
            expires_at: row.get(8)?,
            is_active: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO enrollments (student_id, course_id, status, enrolled_at, started_at,
             completed_at, dropped_at, expires_at, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                self.student_id,
                self.course_id,
                self.status.as_str(),
                self.enrolled_at,
                self.started_at,
                self.completed_at,
                self.dropped_at,
                self.expires_at,
                self.is_active,
                self.created_at,
                self.updated_at
            ],
        )
    }

    fn update(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE enrollments SET student_id = ?1, course_id = ?2, status = ?3,
             enrolled_at = ?4, started_at = ?5, completed_at = ?6, dropped_at = ?7,
             expires_at = ?8, is_active = ?9, updated_at = ?10 WHERE id = ?11",
            params![
                self.student_id,
                self.course_id,
                self.status.as_str(),
                self.enrolled_at,
                self.started_at,
                self.completed_at,
                self.dropped_at,
                self.expires_at,
                self.is_active,
                self.updated_at,
                self.id
            ],
        )
    }
}

impl Record for Progress {
    const COLLECTION: Collection = Collection::Progress;
    const COLUMNS: &'static str = "id, student_id, course_id, status, overall_progress, \
        points_earned, total_points, is_global, completed_lessons, module_progress, \
        quiz_attempts, discussions, assignments, started_at, completed_at, last_accessed, \
        created_at, updated_at";

    fn id(&self) -> i64 {
        self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Progress {
            id: row.get(0)?,
            student_id: row.get(1)?,
            course_id: row.get(2)?,
            status: enum_col(row, 3)?,
            overall_progress: row.get(4)?,
            points_earned: row.get(5)?,
            total_points: row.get(6)?,
            is_global: row.get(7)?,
            completed_lessons: json_col(row, 8)?,
            module_progress: json_col(row, 9)?,
            quiz_attempts: json_col(row, 10)?,
            discussions: json_col(row, 11)?,
            assignments: json_col(row, 12)?,
            started_at: row.get(13)?,
            completed_at: row.get(14)?,
            last_accessed: row.get(15)?,
            created_at: row.get(16)?,
            updated_at: row.get(17)?,
        })
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO progress (student_id, course_id, status, overall_progress,
             points_earned, total_points, is_global, completed_lessons, module_progress,
             quiz_attempts, discussions, assignments, started_at, completed_at, last_accessed,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                self.student_id,
                self.course_id,
                self.status.as_str(),
                self.overall_progress,
                self.points_earned,
                self.total_points,
                self.is_global,
                to_json(&self.completed_lessons)?,
                to_json(&self.module_progress)?,
                to_json(&self.quiz_attempts)?,
                to_json(&self.discussions)?,
                to_json(&self.assignments)?,
                self.started_at,
                self.completed_at,
                self.last_accessed,
                self.created_at,
                self.updated_at
            ],
        )
    }

    fn update(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE progress SET student_id = ?1, course_id = ?2, status = ?3,
             overall_progress = ?4, points_earned = ?5, total_points = ?6, is_global = ?7,
             completed_lessons = ?8, module_progress = ?9, quiz_attempts = ?10,
             discussions = ?11, assignments = ?12, started_at = ?13, completed_at = ?14,
             last_accessed = ?15, updated_at = ?16 WHERE id = ?17",
            params![
                self.student_id,
                self.course_id,
                self.status.as_str(),
                self.overall_progress,
                self.points_earned,
                self.total_points,
                self.is_global,
                to_json(&self.completed_lessons)?,
                to_json(&self.module_progress)?,
                to_json(&self.quiz_attempts)?,
                to_json(&self.discussions)?,
                to_json(&self.assignments)?,
                self.started_at,
                self.completed_at,
                self.last_accessed,
                self.updated_at,
                self.id
            ],
        )
    }
}

impl LmsDb {
    // ── Course structure ──────────────────────────────────────────────

    pub fn count_lessons_in_course(&self, course_id: i64) -> Result<i64> {
        self.count::<Lesson>(
            &Filters::new().clause(
                "module_id IN (SELECT id FROM modules WHERE course_id = ?)",
                course_id,
            ),
        )
    }

    /// Course owning a lesson, through its module.
    pub fn course_for_lesson(&self, lesson_id: i64) -> Result<Option<i64>> {
        self.conn
            .query_row(
                "SELECT m.course_id FROM lessons l JOIN modules m ON m.id = l.module_id
                 WHERE l.id = ?1",
                params![lesson_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to resolve course for lesson")
    }

    pub fn modules_for_course(&self, course_id: i64) -> Result<Vec<Module>> {
        self.find_all(&Filters::new().eq("course_id", course_id), "sort_order, id")
    }

    pub fn lessons_for_module(&self, module_id: i64) -> Result<Vec<Lesson>> {
        self.find_all(&Filters::new().eq("module_id", module_id), "sort_order, id")
    }

    // ── Enrollments ───────────────────────────────────────────────────

    pub fn count_active_enrollments(&self, course_id: i64) -> Result<i64> {
        self.count::<Enrollment>(
            &Filters::new()
                .eq("course_id", course_id)
                .eq("status", EnrollmentStatus::Active.as_str().to_string()),
        )
    }

    pub fn has_completed_enrollment(&self, student_id: i64, course_id: i64) -> Result<bool> {
        let n = self.count::<Enrollment>(
            &Filters::new()
                .eq("student_id", student_id)
                .eq("course_id", course_id)
                .eq("status", EnrollmentStatus::Completed.as_str().to_string()),
        )?;
        Ok(n > 0)
    }

    /// Students enrolled in a course, in any status.
    pub fn enrolled_student_ids(&self, course_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT student_id FROM enrollments WHERE course_id = ?1 ORDER BY student_id")
            .context("Failed to prepare enrolled_student_ids")?;
        let rows = stmt
            .query_map(params![course_id], |row| row.get(0))
            .context("Failed to query enrolled students")?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row.context("Failed to read enrollment row")?);
        }
        Ok(ids)
    }

    // ── Progress ──────────────────────────────────────────────────────

    pub fn progress_for(&self, student_id: i64, course_id: i64) -> Result<Option<Progress>> {
        self.find_one(
            &Filters::new()
                .eq("student_id", student_id)
                .eq("course_id", course_id),
        )
    }

    pub fn progress_records(&self, student_id: i64) -> Result<Vec<Progress>> {
        self.find_all(&Filters::new().eq("student_id", student_id), "id")
    }

    pub fn has_progress(&self, student_id: i64) -> Result<bool> {
        Ok(self.count::<Progress>(&Filters::new().eq("student_id", student_id))? > 0)
    }

    pub fn add_points_earned(&self, progress_id: i64, amount: i64, now: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE progress SET points_earned = points_earned + ?1, last_accessed = ?2,
                 updated_at = ?2 WHERE id = ?3",
                params![amount, now, progress_id],
            )
            .context("Failed to update points_earned")?;
        Ok(())
    }

    /// Add to `total_points` on every progress record of a student.
    pub fn add_total_points(&self, student_id: i64, amount: i64, now: &str) -> Result<usize> {
        self.conn
            .execute(
                "UPDATE progress SET total_points = total_points + ?1, updated_at = ?2
                 WHERE student_id = ?3",
                params![amount, now, student_id],
            )
            .context("Failed to update total_points")
    }
}
