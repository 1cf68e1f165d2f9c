//! Tenants, users (with credentials and sessions), student settings, media.

use anyhow::{Context, Result};
use lms_common::models::{Media, StudentSettings, Tenant, User};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::{Filters, LmsDb, Record, enum_col, json_col, to_json};
use crate::access::Collection;

impl Record for Tenant {
    const COLLECTION: Collection = Collection::Tenants;
    const COLUMNS: &'static str = "id, name, slug, domain, status, settings, created_at, updated_at";

    fn id(&self) -> i64 {
        self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Tenant {
            id: row.get(0)?,
            name: row.get(1)?,
            slug: row.get(2)?,
            domain: row.get(3)?,
            status: enum_col(row, 4)?,
            settings: json_col(row, 5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO tenants (name, slug, domain, status, settings, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                self.name,
                self.slug,
                self.domain,
                self.status.as_str(),
                to_json(&self.settings)?,
                self.created_at,
                self.updated_at
            ],
        )
    }

    fn update(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE tenants SET name = ?1, slug = ?2, domain = ?3, status = ?4, settings = ?5,
             updated_at = ?6 WHERE id = ?7",
            params![
                self.name,
                self.slug,
                self.domain,
                self.status.as_str(),
                to_json(&self.settings)?,
                self.updated_at,
                self.id
            ],
        )
    }
}

impl Record for User {
    const COLLECTION: Collection = Collection::Users;
    const COLUMNS: &'static str =
        "id, email, name, role, tenant_id, avatar_id, verified, last_active, created_at, updated_at";

    fn id(&self) -> i64 {
        self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            name: row.get(2)?,
            role: enum_col(row, 3)?,
            tenant_id: row.get(4)?,
            avatar_id: row.get(5)?,
            verified: row.get(6)?,
            last_active: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO users (email, name, role, tenant_id, avatar_id, verified, last_active,
             created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                self.email,
                self.name,
                self.role.as_str(),
                self.tenant_id,
                self.avatar_id,
                self.verified,
                self.last_active,
                self.created_at,
                self.updated_at
            ],
        )
    }

    fn update(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE users SET email = ?1, name = ?2, role = ?3, tenant_id = ?4, avatar_id = ?5,
             verified = ?6, last_active = ?7, updated_at = ?8 WHERE id = ?9",
            params![
                self.email,
                self.name,
                self.role.as_str(),
                self.tenant_id,
                self.avatar_id,
                self.verified,
                self.last_active,
                self.updated_at,
                self.id
            ],
        )
    }
}

impl Record for StudentSettings {
    const COLLECTION: Collection = Collection::StudentSettings;
    const COLUMNS: &'static str = "id, user_id, preferences, created_at, updated_at";

    fn id(&self) -> i64 {
        self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(StudentSettings {
            id: row.get(0)?,
            user_id: row.get(1)?,
            preferences: json_col(row, 2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO student_settings (user_id, preferences, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                self.user_id,
                to_json(&self.preferences)?,
                self.created_at,
                self.updated_at
            ],
        )
    }

    fn update(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE student_settings SET user_id = ?1, preferences = ?2, updated_at = ?3
             WHERE id = ?4",
            params![
                self.user_id,
                to_json(&self.preferences)?,
                self.updated_at,
                self.id
            ],
        )
    }
}

impl Record for Media {
    const COLLECTION: Collection = Collection::Media;
    const COLUMNS: &'static str = "id, filename, mime_type, filesize, width, height, url, \
        thumbnail_url, alt, tenant_id, is_global, created_at, updated_at";

    fn id(&self) -> i64 {
        self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Media {
            id: row.get(0)?,
            filename: row.get(1)?,
            mime_type: row.get(2)?,
            filesize: row.get(3)?,
            width: row.get(4)?,
            height: row.get(5)?,
            url: row.get(6)?,
            thumbnail_url: row.get(7)?,
            alt: row.get(8)?,
            tenant_id: row.get(9)?,
            is_global: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO media (filename, mime_type, filesize, width, height, url, thumbnail_url,
             alt, tenant_id, is_global, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                self.filename,
                self.mime_type,
                self.filesize,
                self.width,
                self.height,
                self.url,
                self.thumbnail_url,
                self.alt,
                self.tenant_id,
                self.is_global,
                self.created_at,
                self.updated_at
            ],
        )
    }

    fn update(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE media SET filename = ?1, mime_type = ?2, filesize = ?3, width = ?4,
             height = ?5, url = ?6, thumbnail_url = ?7, alt = ?8, tenant_id = ?9,
             is_global = ?10, updated_at = ?11 WHERE id = ?12",
            params![
                self.filename,
                self.mime_type,
                self.filesize,
                self.width,
                self.height,
                self.url,
                self.thumbnail_url,
                self.alt,
                self.tenant_id,
                self.is_global,
                self.updated_at,
                self.id
            ],
        )
    }
}

/// Stored password material and lockout state for one user.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user_id: i64,
    pub password_hash: String,
    pub salt: String,
    pub login_attempts: i64,
    pub lock_until: Option<String>,
}

impl LmsDb {
    // ── Users and credentials ─────────────────────────────────────────

    pub fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.find_one(&Filters::new().eq("email", email.to_string()))
    }

    pub fn user_by_api_key(&self, api_key: &str) -> Result<Option<User>> {
        self.find_one(&Filters::new().eq("api_key", api_key.to_string()))
    }

    pub fn credentials(&self, user_id: i64) -> Result<Option<Credentials>> {
        self.conn
            .query_row(
                "SELECT id, password_hash, salt, login_attempts, lock_until FROM users WHERE id = ?1",
                params![user_id],
                |row| {
                    Ok(Credentials {
                        user_id: row.get(0)?,
                        password_hash: row.get(1)?,
                        salt: row.get(2)?,
                        login_attempts: row.get(3)?,
                        lock_until: row.get(4)?,
                    })
                },
            )
            .optional()
            .context("Failed to query credentials")
    }

    pub fn set_password(&self, user_id: i64, password_hash: &str, salt: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE users SET password_hash = ?1, salt = ?2, login_attempts = 0, lock_until = NULL
                 WHERE id = ?3",
                params![password_hash, salt, user_id],
            )
            .context("Failed to update password")?;
        Ok(())
    }

    pub fn record_failed_login(
        &self,
        user_id: i64,
        attempts: i64,
        lock_until: Option<&str>,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE users SET login_attempts = ?1, lock_until = ?2 WHERE id = ?3",
                params![attempts, lock_until, user_id],
            )
            .context("Failed to record failed login")?;
        Ok(())
    }

    pub fn record_successful_login(&self, user_id: i64, at: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE users SET login_attempts = 0, lock_until = NULL, last_active = ?1
                 WHERE id = ?2",
                params![at, user_id],
            )
            .context("Failed to record login")?;
        Ok(())
    }

    pub fn set_api_key(&self, user_id: i64, api_key: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE users SET api_key = ?1 WHERE id = ?2",
                params![api_key, user_id],
            )
            .context("Failed to set API key")?;
        Ok(())
    }

    pub fn count_users(&self) -> Result<i64> {
        self.count::<User>(&Filters::new())
    }

    // ── Sessions ──────────────────────────────────────────────────────

    pub fn create_session(&self, token: &str, user_id: i64, expires_at: &str, now: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sessions (token, user_id, expires_at, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![token, user_id, expires_at, now],
            )
            .context("Failed to insert session")?;
        Ok(())
    }

    /// The user owning an unexpired session.
    pub fn session_user(&self, token: &str, now: &str) -> Result<Option<User>> {
        let filters = Filters::new()
            .clause(
                "id = (SELECT user_id FROM sessions WHERE token = ? AND expires_at > ?)",
                token.to_string(),
            )
            .with_param(now.to_string());
        self.find_one(&filters)
    }

    pub fn delete_session(&self, token: &str) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM sessions WHERE token = ?1", params![token])
            .context("Failed to delete session")?;
        Ok(affected > 0)
    }

    pub fn purge_expired_sessions(&self, now: &str) -> Result<usize> {
        self.conn
            .execute("DELETE FROM sessions WHERE expires_at <= ?1", params![now])
            .context("Failed to purge sessions")
    }

    // ── Student settings ──────────────────────────────────────────────

    pub fn student_settings_for(&self, user_id: i64) -> Result<Option<StudentSettings>> {
        self.find_one(&Filters::new().eq("user_id", user_id))
    }
}
