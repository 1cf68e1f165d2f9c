use lms_common::models::{
    Media, Role, StudentPreferences, StudentSettings, Tenant, TenantSettings, TenantStatus, User,
};
use serde::Deserialize;

use super::{Document, ensure_own_tenant, ensure_unchanged, require_text};
use crate::access::{self, AuthUser};
use crate::context::Ctx;
use crate::errors::{LmsError, LmsResult};
use crate::hooks;

// ── Tenants ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TenantInput {
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub status: Option<TenantStatus>,
    #[serde(default)]
    pub settings: Option<TenantSettings>,
}

impl Document for Tenant {
    type Input = TenantInput;

    fn build(input: TenantInput, _user: &AuthUser, now: &str) -> LmsResult<Self> {
        Ok(Tenant {
            id: 0,
            slug: input.slug.unwrap_or_default(),
            name: input.name,
            domain: input.domain,
            status: input.status.unwrap_or(TenantStatus::Active),
            settings: input.settings.unwrap_or_default(),
            created_at: now.to_string(),
            updated_at: now.to_string(),
        })
    }

    fn before_change(&mut self, _ctx: Ctx<'_>, _user: &AuthUser, _previous: Option<&Self>) -> LmsResult<()> {
        require_text(&self.name, "Name")?;
        if self.slug.trim().is_empty() {
            self.slug = hooks::tenant_slug(&self.name);
        }
        self.updated_at = lms_common::time::now_ts();
        Ok(())
    }
}

// ── Users ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UserInput {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub tenant_id: Option<i64>,
    #[serde(default)]
    pub avatar_id: Option<i64>,
}

impl Document for User {
    type Input = UserInput;

    fn build(input: UserInput, user: &AuthUser, now: &str) -> LmsResult<Self> {
        Ok(User {
            id: 0,
            email: input.email,
            name: input.name,
            role: input.role.unwrap_or(Role::Student),
            tenant_id: hooks::resolve_tenant(input.tenant_id, false, user),
            avatar_id: input.avatar_id,
            verified: false,
            last_active: None,
            created_at: now.to_string(),
            updated_at: now.to_string(),
        })
    }

    fn before_change(&mut self, ctx: Ctx<'_>, user: &AuthUser, previous: Option<&Self>) -> LmsResult<()> {
        self.email = self.email.trim().to_lowercase();
        if !self.email.contains('@') {
            return Err(LmsError::validation("A valid email is required"));
        }
        require_text(&self.name, "Name")?;
        hooks::normalize_opt_ts("last_active", &mut self.last_active)?;

        if let Some(previous) = previous {
            ensure_unchanged(user, &previous.role, &self.role)?;
            ensure_unchanged(user, &previous.tenant_id, &self.tenant_id)?;
            ensure_unchanged(user, &previous.verified, &self.verified)?;
        }
        if previous.is_none_or(|p| p.email != self.email) {
            if let Some(existing) = ctx.db.user_by_email(&self.email)? {
                if previous.is_none_or(|p| p.id != existing.id) {
                    return Err(LmsError::Conflict(format!(
                        "A user with email {} already exists",
                        self.email
                    )));
                }
            }
        }
        if self.role != Role::Admin && self.tenant_id.is_none() {
            return Err(LmsError::validation("Tenant is required for non-admin users"));
        }
        self.updated_at = lms_common::time::now_ts();
        Ok(())
    }
}

// ── Student settings ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StudentSettingsInput {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub preferences: Option<StudentPreferences>,
}

impl Document for StudentSettings {
    type Input = StudentSettingsInput;

    fn build(input: StudentSettingsInput, user: &AuthUser, now: &str) -> LmsResult<Self> {
        Ok(StudentSettings {
            id: 0,
            user_id: input.user_id.unwrap_or(user.id),
            preferences: input.preferences.unwrap_or_default(),
            created_at: now.to_string(),
            updated_at: now.to_string(),
        })
    }

    fn before_change(&mut self, _ctx: Ctx<'_>, user: &AuthUser, previous: Option<&Self>) -> LmsResult<()> {
        if !access::is_admin_or_self(Some(user), self.user_id) {
            return Err(LmsError::Forbidden);
        }
        if let Some(previous) = previous {
            ensure_unchanged(user, &previous.user_id, &self.user_id)?;
        }
        self.updated_at = lms_common::time::now_ts();
        Ok(())
    }
}

// ── Media ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MediaInput {
    pub filename: String,
    pub mime_type: String,
    #[serde(default)]
    pub filesize: i64,
    #[serde(default)]
    pub width: Option<i64>,
    #[serde(default)]
    pub height: Option<i64>,
    pub url: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub alt: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<i64>,
    #[serde(default)]
    pub is_global: bool,
}

impl Document for Media {
    type Input = MediaInput;

    fn build(input: MediaInput, user: &AuthUser, now: &str) -> LmsResult<Self> {
        Ok(Media {
            id: 0,
            filename: input.filename,
            mime_type: input.mime_type,
            filesize: input.filesize,
            width: input.width,
            height: input.height,
            url: input.url,
            thumbnail_url: input.thumbnail_url,
            alt: input.alt,
            tenant_id: hooks::resolve_tenant(input.tenant_id, input.is_global, user),
            is_global: input.is_global,
            created_at: now.to_string(),
            updated_at: now.to_string(),
        })
    }

    fn before_change(&mut self, _ctx: Ctx<'_>, user: &AuthUser, _previous: Option<&Self>) -> LmsResult<()> {
        require_text(&self.filename, "Filename")?;
        require_text(&self.url, "URL")?;
        if self.filesize < 0 {
            return Err(LmsError::validation("Filesize cannot be negative"));
        }
        if self.is_global {
            self.tenant_id = None;
        }
        ensure_own_tenant(user, self.tenant_id)?;
        self.updated_at = lms_common::time::now_ts();
        Ok(())
    }
}
