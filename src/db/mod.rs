//! SQLite storage for every LMS collection.
//!
//! `LmsDb` owns a single connection. Each collection's record type
//! implements [`Record`], which gives it generic get/list/create/save/delete
//! with optional access [`Scope`] filtering. Collection-specific queries
//! (credentials, ledgers, rankings) live next to the row mappings in the
//! submodules.

mod gamification;
mod learning;
mod system;

pub use system::Credentials;

#[cfg(test)]
pub(crate) use learning::fixtures;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params_from_iter};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::access::{Collection, Scope};

/// Async-safe handle to the LMS database.
///
/// Wraps `LmsDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O
/// never ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<LmsDb>>,
}

impl DbHandle {
    pub fn new(db: LmsDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R, E>(&self, f: F) -> std::result::Result<R, E>
    where
        F: FnOnce(&LmsDb) -> std::result::Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: From<anyhow::Error> + Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .map_err(|e| E::from(anyhow::anyhow!("DB task panicked: {}", e)))?
    }

    /// Acquire the database mutex synchronously. Used at startup, in the
    /// CLI, and in tests; never from a request path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, LmsDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

pub struct LmsDb {
    conn: Connection,
}

impl LmsDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS tenants (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    slug TEXT NOT NULL UNIQUE,
                    domain TEXT,
                    status TEXT NOT NULL DEFAULT 'active',
                    settings TEXT NOT NULL DEFAULT '{}',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    email TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL,
                    role TEXT NOT NULL DEFAULT 'student',
                    tenant_id INTEGER REFERENCES tenants(id) ON DELETE SET NULL,
                    avatar_id INTEGER,
                    verified INTEGER NOT NULL DEFAULT 0,
                    last_active TEXT,
                    password_hash TEXT NOT NULL DEFAULT '',
                    salt TEXT NOT NULL DEFAULT '',
                    api_key TEXT UNIQUE,
                    login_attempts INTEGER NOT NULL DEFAULT 0,
                    lock_until TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS sessions (
                    token TEXT PRIMARY KEY,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    expires_at TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS student_settings (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
                    preferences TEXT NOT NULL DEFAULT '{}',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS media (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    filename TEXT NOT NULL,
                    mime_type TEXT NOT NULL,
                    filesize INTEGER NOT NULL DEFAULT 0,
                    width INTEGER,
                    height INTEGER,
                    url TEXT NOT NULL,
                    thumbnail_url TEXT,
                    alt TEXT,
                    tenant_id INTEGER REFERENCES tenants(id) ON DELETE CASCADE,
                    is_global INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS courses (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL,
                    slug TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    tenant_id INTEGER REFERENCES tenants(id) ON DELETE CASCADE,
                    is_global INTEGER NOT NULL DEFAULT 0,
                    instructor_id INTEGER NOT NULL REFERENCES users(id),
                    thumbnail_id INTEGER,
                    status TEXT NOT NULL DEFAULT 'draft',
                    duration_hours INTEGER NOT NULL DEFAULT 0,
                    duration_minutes INTEGER NOT NULL DEFAULT 0,
                    schedule TEXT NOT NULL DEFAULT '{}',
                    settings TEXT NOT NULL DEFAULT '{}',
                    enrollment TEXT NOT NULL DEFAULT '{}',
                    prerequisites TEXT NOT NULL DEFAULT '[]',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    published_at TEXT
                );

                CREATE TABLE IF NOT EXISTS modules (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL,
                    description TEXT,
                    course_id INTEGER NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
                    sort_order INTEGER NOT NULL DEFAULT 0,
                    status TEXT NOT NULL DEFAULT 'draft',
                    duration_hours INTEGER NOT NULL DEFAULT 0,
                    duration_minutes INTEGER NOT NULL DEFAULT 0,
                    completion_criteria TEXT NOT NULL DEFAULT '{}',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS lessons (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL,
                    module_id INTEGER NOT NULL REFERENCES modules(id) ON DELETE CASCADE,
                    sort_order INTEGER NOT NULL DEFAULT 0,
                    lesson_type TEXT NOT NULL,
                    description TEXT,
                    status TEXT NOT NULL DEFAULT 'draft',
                    content TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS enrollments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    student_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    course_id INTEGER NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
                    status TEXT NOT NULL DEFAULT 'pending',
                    enrolled_at TEXT NOT NULL,
                    started_at TEXT,
                    completed_at TEXT,
                    dropped_at TEXT,
                    expires_at TEXT,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS progress (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    student_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    course_id INTEGER NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
                    status TEXT NOT NULL DEFAULT 'not_started',
                    overall_progress INTEGER NOT NULL DEFAULT 0,
                    points_earned INTEGER NOT NULL DEFAULT 0,
                    total_points INTEGER NOT NULL DEFAULT 0,
                    is_global INTEGER NOT NULL DEFAULT 0,
                    completed_lessons TEXT NOT NULL DEFAULT '[]',
                    module_progress TEXT NOT NULL DEFAULT '[]',
                    quiz_attempts TEXT NOT NULL DEFAULT '[]',
                    discussions TEXT NOT NULL DEFAULT '[]',
                    assignments TEXT NOT NULL DEFAULT '[]',
                    started_at TEXT NOT NULL,
                    completed_at TEXT,
                    last_accessed TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE(student_id, course_id)
                );

                CREATE TABLE IF NOT EXISTS badges (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    icon_id INTEGER,
                    rarity TEXT NOT NULL DEFAULT 'common',
                    category TEXT NOT NULL DEFAULT 'progress',
                    tenant_id INTEGER REFERENCES tenants(id) ON DELETE CASCADE,
                    is_global INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS achievements (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    achievement_type TEXT NOT NULL,
                    criteria TEXT NOT NULL,
                    badge_id INTEGER NOT NULL REFERENCES badges(id),
                    points INTEGER NOT NULL DEFAULT 0,
                    secret INTEGER NOT NULL DEFAULT 0,
                    tenant_id INTEGER REFERENCES tenants(id) ON DELETE CASCADE,
                    is_global INTEGER NOT NULL DEFAULT 0,
                    prerequisites TEXT NOT NULL DEFAULT '[]',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS points (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    student_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    point_type TEXT NOT NULL,
                    amount INTEGER NOT NULL,
                    source_type TEXT NOT NULL,
                    source_id INTEGER NOT NULL,
                    metadata TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS streaks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    student_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    streak_type TEXT NOT NULL,
                    current_streak INTEGER NOT NULL DEFAULT 0,
                    longest_streak INTEGER NOT NULL DEFAULT 0,
                    last_activity TEXT NOT NULL,
                    next_required TEXT NOT NULL,
                    history TEXT NOT NULL DEFAULT '[]',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE(student_id, streak_type)
                );

                CREATE TABLE IF NOT EXISTS levels (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    level INTEGER NOT NULL,
                    description TEXT,
                    points_required INTEGER NOT NULL,
                    tenant_id INTEGER REFERENCES tenants(id) ON DELETE CASCADE,
                    is_global INTEGER NOT NULL DEFAULT 0,
                    icon_id INTEGER,
                    rewards TEXT NOT NULL DEFAULT '[]',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS leaderboards (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    tenant_id INTEGER REFERENCES tenants(id) ON DELETE CASCADE,
                    is_global INTEGER NOT NULL DEFAULT 0,
                    board_type TEXT NOT NULL,
                    timeframe TEXT NOT NULL DEFAULT 'all_time',
                    scope TEXT NOT NULL DEFAULT '{}',
                    custom_logic TEXT,
                    display_limit INTEGER NOT NULL DEFAULT 10,
                    refresh_interval INTEGER NOT NULL DEFAULT 3600,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS notifications (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    notification_type TEXT NOT NULL,
                    data TEXT NOT NULL DEFAULT '{}',
                    created_at TEXT NOT NULL,
                    read_at TEXT
                );

                CREATE TABLE IF NOT EXISTS user_achievements (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    achievement_id INTEGER NOT NULL REFERENCES achievements(id) ON DELETE CASCADE,
                    completed_at TEXT NOT NULL,
                    UNIQUE(user_id, achievement_id)
                );

                CREATE TABLE IF NOT EXISTS user_badges (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    badge_id INTEGER NOT NULL REFERENCES badges(id) ON DELETE CASCADE,
                    awarded_at TEXT NOT NULL,
                    UNIQUE(user_id, badge_id)
                );

                CREATE INDEX IF NOT EXISTS idx_users_tenant ON users(tenant_id);
                CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
                CREATE INDEX IF NOT EXISTS idx_courses_tenant ON courses(tenant_id);
                CREATE INDEX IF NOT EXISTS idx_courses_instructor ON courses(instructor_id);
                CREATE INDEX IF NOT EXISTS idx_modules_course ON modules(course_id, sort_order);
                CREATE INDEX IF NOT EXISTS idx_lessons_module ON lessons(module_id, sort_order);
                CREATE INDEX IF NOT EXISTS idx_enrollments_course ON enrollments(course_id, status);
                CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_id);
                CREATE INDEX IF NOT EXISTS idx_progress_student ON progress(student_id);
                CREATE INDEX IF NOT EXISTS idx_points_student ON points(student_id, created_at);
                CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, read_at);
                CREATE INDEX IF NOT EXISTS idx_user_achievements_user ON user_achievements(user_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Generic record access ─────────────────────────────────────────

    pub fn get<R: Record>(&self, id: i64) -> Result<Option<R>> {
        self.get_in_scope(id, None)
    }

    /// Fetch a record by id, returning `None` when it is missing or falls
    /// outside `scope`.
    pub fn get_in_scope<R: Record>(&self, id: i64, scope: Option<Scope>) -> Result<Option<R>> {
        let mut filters = Filters::new().eq("id", id);
        if let Some(scope) = scope {
            filters = filters.scope(scope);
        }
        self.find_one(&filters)
    }

    pub fn find_one<R: Record>(&self, filters: &Filters) -> Result<Option<R>> {
        let sql = format!(
            "SELECT {} FROM {}{} ORDER BY id LIMIT 1",
            R::COLUMNS,
            R::COLLECTION.table(),
            filters.where_sql()
        );
        self.conn
            .query_row(&sql, params_from_iter(filters.params.iter()), |row| {
                R::from_row(row)
            })
            .optional()
            .with_context(|| format!("Failed to query {}", R::COLLECTION.table()))
    }

    /// Every record matching `filters`, ordered by `order_by`.
    pub fn find_all<R: Record>(&self, filters: &Filters, order_by: &str) -> Result<Vec<R>> {
        let sql = format!(
            "SELECT {} FROM {}{} ORDER BY {}",
            R::COLUMNS,
            R::COLLECTION.table(),
            filters.where_sql(),
            order_by
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("Failed to prepare {} query", R::COLLECTION.table()))?;
        let rows = stmt
            .query_map(params_from_iter(filters.params.iter()), |row| {
                R::from_row(row)
            })
            .with_context(|| format!("Failed to query {}", R::COLLECTION.table()))?;
        let mut docs = Vec::new();
        for row in rows {
            docs.push(row.with_context(|| format!("Failed to read {} row", R::COLLECTION.table()))?);
        }
        Ok(docs)
    }

    pub fn count<R: Record>(&self, filters: &Filters) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {}{}",
            R::COLLECTION.table(),
            filters.where_sql()
        );
        self.conn
            .query_row(&sql, params_from_iter(filters.params.iter()), |row| {
                row.get(0)
            })
            .with_context(|| format!("Failed to count {}", R::COLLECTION.table()))
    }

    /// One page of records matching `filters`, ordered by id.
    pub fn list<R: Record>(&self, filters: &Filters, page: Page) -> Result<Paginated<R>> {
        self.list_ordered(filters, "id", page)
    }

    pub fn list_ordered<R: Record>(
        &self,
        filters: &Filters,
        order_by: &str,
        page: Page,
    ) -> Result<Paginated<R>> {
        let (limit, number) = page.normalized();
        let offset = page
            .offset()
            .with_context(|| format!("Page {number} is out of range"))?;
        let total_docs = self.count::<R>(filters)?;
        let docs =
            self.find_all::<R>(filters, &format!("{order_by} LIMIT {limit} OFFSET {offset}"))?;
        Ok(Paginated::new(docs, total_docs, limit, number))
    }

    /// Insert a new record and return it as stored.
    pub fn create<R: Record>(&self, doc: &R) -> Result<R> {
        doc.insert(&self.conn)
            .with_context(|| format!("Failed to insert into {}", R::COLLECTION.table()))?;
        let id = self.conn.last_insert_rowid();
        self.get::<R>(id)?
            .with_context(|| format!("{} not found after insert", R::COLLECTION.label()))
    }

    /// Write every column of an existing record.
    pub fn save<R: Record>(&self, doc: &R) -> Result<R> {
        doc.update(&self.conn)
            .with_context(|| format!("Failed to update {}", R::COLLECTION.table()))?;
        self.get::<R>(doc.id())?
            .with_context(|| format!("{} not found after update", R::COLLECTION.label()))
    }

    pub fn delete<R: Record>(&self, id: i64) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", R::COLLECTION.table());
        let affected = self
            .conn
            .execute(&sql, [id])
            .with_context(|| format!("Failed to delete from {}", R::COLLECTION.table()))?;
        Ok(affected > 0)
    }
}

/// A collection document persisted in its own table.
pub trait Record: Sized + Send + 'static {
    const COLLECTION: Collection;
    /// Select list, in the order `from_row` reads it.
    const COLUMNS: &'static str;

    fn id(&self) -> i64;
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
    /// Insert every column except `id`.
    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize>;
    /// Update every column except `id` and `created_at`.
    fn update(&self, conn: &Connection) -> rusqlite::Result<usize>;
}

// ── Query helpers ─────────────────────────────────────────────────────

/// `WHERE` clauses joined with `AND`, each with its bound values.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.clauses.push(format!("{column} = ?"));
        self.params.push(value.into());
        self
    }

    /// A clause with exactly one `?` placeholder.
    pub fn clause(mut self, sql: &str, value: impl Into<Value>) -> Self {
        self.clauses.push(sql.to_string());
        self.params.push(value.into());
        self
    }

    /// Bind another value to the most recent clause.
    pub fn with_param(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    /// A clause with no placeholders.
    pub fn raw(mut self, sql: &str) -> Self {
        self.clauses.push(sql.to_string());
        self
    }

    pub fn scope(self, scope: Scope) -> Self {
        let (sql, value) = scope.clause();
        self.clause(sql, value)
    }

    pub fn maybe_scope(self, scope: Option<Scope>) -> Self {
        match scope {
            Some(scope) => self.scope(scope),
            None => self,
        }
    }

    fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

pub const DEFAULT_PAGE_LIMIT: i64 = 10;
pub const MAX_PAGE_LIMIT: i64 = 100;

/// `?limit=&page=` query parameters.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Page {
    pub limit: Option<i64>,
    pub page: Option<i64>,
}

impl Page {
    pub fn new(limit: i64, page: i64) -> Self {
        Self {
            limit: Some(limit),
            page: Some(page),
        }
    }

    /// Clamped `(limit, page)`; pages start at 1.
    pub fn normalized(&self) -> (i64, i64) {
        let limit = self
            .limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT);
        let page = self.page.unwrap_or(1).max(1);
        (limit, page)
    }

    /// Rows skipped before this page, or `None` when that overflows.
    pub fn offset(&self) -> Option<i64> {
        let (limit, page) = self.normalized();
        (page - 1).checked_mul(limit)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub docs: Vec<T>,
    pub total_docs: i64,
    pub limit: i64,
    pub page: i64,
    pub total_pages: i64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl<T> Paginated<T> {
    fn new(docs: Vec<T>, total_docs: i64, limit: i64, page: i64) -> Self {
        let total_pages = (total_docs + limit - 1) / limit;
        Self {
            docs,
            total_docs,
            limit,
            page,
            total_pages,
            has_next_page: page < total_pages,
            has_prev_page: page > 1,
        }
    }
}

// ── Row conversion ────────────────────────────────────────────────────

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

/// Read a TEXT column holding JSON.
pub(crate) fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(idx, e))
}

/// Read a nullable TEXT column holding JSON.
pub(crate) fn opt_json_col<T: DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| serde_json::from_str(&t).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

/// Read a TEXT column holding a string enum.
pub(crate) fn enum_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    T::from_str(&text).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> rusqlite::Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

/// True when `err` was caused by a UNIQUE or other constraint violation.
pub fn is_constraint_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let db = LmsDb::new_in_memory()?;
        let table_count: i64 = db.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN
             ('tenants', 'users', 'courses', 'progress', 'achievements', 'points', 'streaks')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 7);
        Ok(())
    }

    #[test]
    fn test_migrations_are_idempotent() -> Result<()> {
        let db = LmsDb::new_in_memory()?;
        db.run_migrations()?;
        db.run_migrations()?;
        Ok(())
    }

    #[test]
    fn test_open_file_database() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("lms.db");
        {
            let _db = LmsDb::new(&path)?;
        }
        assert!(path.exists());
        let _reopened = LmsDb::new(&path)?;
        Ok(())
    }

    #[test]
    fn test_page_normalization() {
        assert_eq!(Page::default().normalized(), (10, 1));
        assert_eq!(Page::new(500, 0).normalized(), (100, 1));
        assert_eq!(Page::new(0, 3).normalized(), (1, 3));
        assert_eq!(Page::new(20, 3).offset(), Some(40));
        assert_eq!(Page::new(100, i64::MAX).offset(), None);
    }

    #[test]
    fn test_out_of_range_page_fails_cleanly() -> Result<()> {
        use lms_common::models::Tenant;

        let db = LmsDb::new_in_memory()?;
        let err = db
            .list::<Tenant>(&Filters::new(), Page::new(100, i64::MAX))
            .err()
            .map(|e| e.to_string());
        assert!(err.is_some_and(|msg| msg.contains("out of range")));

        let page = db.list::<Tenant>(&Filters::new(), Page::default())?;
        assert_eq!(page.total_docs, 0);
        Ok(())
    }

    #[test]
    fn test_paginated_flags() {
        let p = Paginated::new(vec![1, 2], 5, 2, 2);
        assert_eq!(p.total_pages, 3);
        assert!(p.has_next_page);
        assert!(p.has_prev_page);

        let empty: Paginated<i32> = Paginated::new(vec![], 0, 10, 1);
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_next_page);
    }

    #[test]
    fn test_filters_where_sql() {
        let f = Filters::new()
            .eq("tenant_id", 3)
            .scope(Scope::TenantOrGlobal(3));
        assert_eq!(
            f.where_sql(),
            " WHERE tenant_id = ? AND (tenant_id = ? OR is_global = 1)"
        );
        assert_eq!(f.params.len(), 2);
        assert_eq!(Filters::new().where_sql(), "");
    }
}
