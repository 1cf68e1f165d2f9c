//! Access-checked CRUD shared by every collection.
//!
//! Reads work on any [`Record`]. Writes go through [`Document`], which adds
//! the typed create body and the before/after change hooks. Create and
//! update run in one transaction so a failing hook or scope check leaves
//! nothing behind.

mod gamification;
mod learning;
mod system;

pub use gamification::{AchievementInput, BadgeInput, LeaderboardInput, LevelInput};
pub use learning::{CourseInput, EnrollmentInput, LessonInput, ModuleInput, ProgressInput};
pub use system::{MediaInput, StudentSettingsInput, TenantInput, UserInput};

use lms_common::time::now_ts;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::info;

use crate::access::{self, AuthUser, Operation, Scope};
use crate::context::Ctx;
use crate::db::{Filters, LmsDb, Page, Paginated, Record};
use crate::errors::{LmsError, LmsResult};

/// A collection document writable through the API.
pub trait Document: Record + Serialize + DeserializeOwned + Clone {
    /// Body accepted on create.
    type Input: DeserializeOwned + Send + 'static;

    /// Build a new document from its create body.
    fn build(input: Self::Input, user: &AuthUser, now: &str) -> LmsResult<Self>;

    /// Runs before every write. `previous` is `None` on create.
    fn before_change(
        &mut self,
        _ctx: Ctx<'_>,
        _user: &AuthUser,
        _previous: Option<&Self>,
    ) -> LmsResult<()> {
        Ok(())
    }

    /// Runs after every write, inside the same transaction.
    fn after_change(&self, _ctx: Ctx<'_>, _user: &AuthUser, _previous: Option<&Self>) -> LmsResult<()> {
        Ok(())
    }
}

fn label<R: Record>() -> &'static str {
    R::COLLECTION.label()
}

/// Load a document and check it against `scope`: missing is NotFound,
/// present but out of scope is Forbidden.
pub(crate) fn load_scoped<R: Record>(db: &LmsDb, id: i64, scope: Option<Scope>) -> LmsResult<R> {
    let doc = db
        .get::<R>(id)?
        .ok_or(LmsError::not_found(label::<R>(), id))?;
    if let Some(scope) = scope {
        if db.get_in_scope::<R>(id, Some(scope))?.is_none() {
            return Err(LmsError::Forbidden);
        }
    }
    Ok(doc)
}

/// Reject page numbers whose row offset does not fit in an i64.
pub(crate) fn check_page(page: Page) -> LmsResult<Page> {
    match page.offset() {
        Some(_) => Ok(page),
        None => Err(LmsError::validation("Page number is out of range")),
    }
}

/// One page of the documents the caller may read.
pub fn find<R: Record>(
    db: &LmsDb,
    user: &AuthUser,
    filters: Filters,
    page: Page,
) -> LmsResult<Paginated<R>> {
    let scope = access::require(R::COLLECTION, Operation::Read, Some(user))?;
    let page = check_page(page)?;
    Ok(db.list::<R>(&filters.maybe_scope(scope), page)?)
}

pub fn find_by_id<R: Record>(db: &LmsDb, user: &AuthUser, id: i64) -> LmsResult<R> {
    let scope = access::require(R::COLLECTION, Operation::Read, Some(user))?;
    load_scoped(db, id, scope)
}

pub fn create<D: Document>(ctx: Ctx<'_>, user: &AuthUser, input: D::Input) -> LmsResult<D> {
    let scope = access::require(D::COLLECTION, Operation::Create, Some(user))?;
    let now = now_ts();
    let mut doc = D::build(input, user, &now)?;
    doc.before_change(ctx, user, None)?;

    let created = ctx.transaction(|ctx| {
        let created = ctx.db.create(&doc).map_err(LmsError::from_storage)?;
        if let Some(scope) = scope {
            if ctx.db.get_in_scope::<D>(created.id(), Some(scope))?.is_none() {
                return Err(LmsError::Forbidden);
            }
        }
        created.after_change(ctx, user, None)?;
        Ok(created)
    })?;

    info!(
        collection = D::COLLECTION.table(),
        id = created.id(),
        user_id = user.id,
        "document created"
    );
    Ok(created)
}

/// Apply a partial JSON body to an existing document.
pub fn update<D: Document>(ctx: Ctx<'_>, user: &AuthUser, id: i64, patch: Value) -> LmsResult<D> {
    let scope = access::require(D::COLLECTION, Operation::Update, Some(user))?;
    let db = ctx.db;
    let previous = load_scoped::<D>(db, id, scope)?;
    let mut doc = merge_patch(&previous, patch)?;
    doc.before_change(ctx, user, Some(&previous))?;

    let saved = ctx.transaction(|ctx| {
        let saved = ctx.db.save(&doc).map_err(LmsError::from_storage)?;
        saved.after_change(ctx, user, Some(&previous))?;
        Ok(saved)
    })?;

    info!(collection = D::COLLECTION.table(), id, user_id = user.id, "document updated");
    Ok(saved)
}

/// Delete a document and return it as it was.
pub fn delete<R: Record>(db: &LmsDb, user: &AuthUser, id: i64) -> LmsResult<R> {
    let scope = access::require(R::COLLECTION, Operation::Delete, Some(user))?;
    let doc = load_scoped::<R>(db, id, scope)?;
    db.delete::<R>(id).map_err(LmsError::from_storage)?;
    info!(collection = R::COLLECTION.table(), id, user_id = user.id, "document deleted");
    Ok(doc)
}

/// Fields no update may touch.
const READ_ONLY: &[&str] = &["id", "created_at"];

/// Overlay `patch` onto the serialized document. Objects merge key by key;
/// everything else, arrays included, is replaced.
pub fn merge_patch<D: Serialize + DeserializeOwned>(doc: &D, patch: Value) -> LmsResult<D> {
    let Value::Object(changes) = patch else {
        return Err(LmsError::validation("Update body must be a JSON object"));
    };
    let mut current = serde_json::to_value(doc).map_err(|e| LmsError::Other(e.into()))?;
    if let Value::Object(fields) = &mut current {
        for (key, value) in changes {
            if READ_ONLY.contains(&key.as_str()) {
                continue;
            }
            match fields.get_mut(&key) {
                Some(existing) => merge_value(existing, value),
                None => {
                    fields.insert(key, value);
                }
            }
        }
    }
    serde_json::from_value(current).map_err(|e| LmsError::validation(format!("Invalid update: {e}")))
}

fn merge_value(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

// ── Hook helpers shared by the collection impls ───────────────────────

/// Non-admins may only write documents of their own tenant.
pub(crate) fn ensure_own_tenant(user: &AuthUser, tenant_id: Option<i64>) -> LmsResult<()> {
    if access::is_admin(Some(user)) {
        return Ok(());
    }
    match tenant_id {
        Some(t) if Some(t) != user.tenant_id => Err(LmsError::Forbidden),
        _ => Ok(()),
    }
}

/// Non-admins may not change a field the document was created with.
pub(crate) fn ensure_unchanged<T: PartialEq>(user: &AuthUser, before: &T, after: &T) -> LmsResult<()> {
    if before != after && !access::is_admin(Some(user)) {
        return Err(LmsError::Forbidden);
    }
    Ok(())
}

pub(crate) fn require_text(value: &str, field: &str) -> LmsResult<()> {
    if value.trim().is_empty() {
        return Err(LmsError::validation(format!("{field} is required")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LmsConfig;
    use crate::db::fixtures::*;
    use crate::notifications::Notifier;
    use anyhow::Result;
    use lms_common::models::{Course, Notification, Role};
    use serde_json::json;

    pub(super) struct Env {
        pub db: LmsDb,
        pub notifier: Notifier,
        pub config: LmsConfig,
    }

    impl Env {
        pub fn new() -> Result<Self> {
            Ok(Self {
                db: LmsDb::new_in_memory()?,
                notifier: Notifier::new(),
                config: LmsConfig::default(),
            })
        }

        pub fn ctx(&self) -> Ctx<'_> {
            Ctx::new(&self.db, &self.notifier, &self.config)
        }
    }

    pub(super) fn auth(u: &lms_common::models::User) -> AuthUser {
        AuthUser {
            id: u.id,
            role: u.role,
            tenant_id: u.tenant_id,
        }
    }

    #[test]
    fn test_merge_patch_is_deep_and_protects_ids() -> Result<()> {
        let env = Env::new()?;
        let t = tenant(&env.db, "acme")?;
        let i = user(&env.db, "i@acme.test", Role::Instructor, Some(t.id))?;
        let c = course(&env.db, "Rust", Some(t.id), i.id)?;

        let patched: Course = merge_patch(
            &c,
            json!({"id": 999, "title": "Rust 2", "enrollment": {"capacity": 3}}),
        )?;
        assert_eq!(patched.id, c.id);
        assert_eq!(patched.title, "Rust 2");
        assert_eq!(patched.enrollment.capacity, 3);
        assert!(patched.enrollment.allow_self_enrollment);

        let err = merge_patch(&c, json!({"status": "bogus"})).unwrap_err();
        assert!(matches!(err, LmsError::Validation(_)));
        let err = merge_patch(&c, json!([1, 2])).unwrap_err();
        assert!(matches!(err, LmsError::Validation(_)));
        Ok(())
    }

    #[test]
    fn test_find_filters_by_scope() -> Result<()> {
        let env = Env::new()?;
        let mine = tenant(&env.db, "mine")?;
        let other = tenant(&env.db, "other")?;
        let i = user(&env.db, "i@mine.test", Role::Instructor, Some(mine.id))?;
        let j = user(&env.db, "j@other.test", Role::Instructor, Some(other.id))?;
        let s = user(&env.db, "s@mine.test", Role::Student, Some(mine.id))?;
        let visible = course(&env.db, "Mine", Some(mine.id), i.id)?;
        let hidden = course(&env.db, "Theirs", Some(other.id), j.id)?;

        let page = find::<Course>(&env.db, &auth(&s), Filters::new(), Page::default())?;
        assert_eq!(page.total_docs, 1);
        assert_eq!(page.docs[0].id, visible.id);

        assert_eq!(find_by_id::<Course>(&env.db, &auth(&s), visible.id)?.id, visible.id);
        let err = find_by_id::<Course>(&env.db, &auth(&s), hidden.id).unwrap_err();
        assert!(matches!(err, LmsError::Forbidden));
        let err = find_by_id::<Course>(&env.db, &auth(&s), 4040).unwrap_err();
        assert!(matches!(err, LmsError::NotFound { .. }));
        Ok(())
    }

    #[test]
    fn test_update_outside_scope_is_forbidden() -> Result<()> {
        let env = Env::new()?;
        let t = tenant(&env.db, "acme")?;
        let owner = user(&env.db, "owner@acme.test", Role::Instructor, Some(t.id))?;
        let other = user(&env.db, "other@acme.test", Role::Instructor, Some(t.id))?;
        let c = course(&env.db, "Owned", Some(t.id), owner.id)?;

        let err = update::<Course>(env.ctx(), &auth(&other), c.id, json!({"title": "Mine now"})).unwrap_err();
        assert!(matches!(err, LmsError::Forbidden));

        let updated = update::<Course>(env.ctx(), &auth(&owner), c.id, json!({"title": "Renamed"}))?;
        assert_eq!(updated.title, "Renamed");
        Ok(())
    }

    #[test]
    fn test_delete_is_admin_only() -> Result<()> {
        let env = Env::new()?;
        let t = tenant(&env.db, "acme")?;
        let admin = user(&env.db, "root@acme.test", Role::Admin, None)?;
        let i = user(&env.db, "i@acme.test", Role::Instructor, Some(t.id))?;
        let c = course(&env.db, "Doomed", Some(t.id), i.id)?;

        let err = delete::<Course>(&env.db, &auth(&i), c.id).unwrap_err();
        assert!(matches!(err, LmsError::Forbidden));
        let gone = delete::<Course>(&env.db, &auth(&admin), c.id)?;
        assert_eq!(gone.id, c.id);
        assert!(env.db.get::<Course>(c.id)?.is_none());
        Ok(())
    }

    #[test]
    fn test_notifications_are_read_only_for_owner() -> Result<()> {
        let env = Env::new()?;
        let a = user(&env.db, "a@x.test", Role::Student, None)?;
        let b = user(&env.db, "b@x.test", Role::Student, None)?;
        let note = crate::notifications::create_notification(
            env.ctx(),
            a.id,
            lms_common::models::NotificationType::LevelUp,
            json!({}),
        )?;
        assert_eq!(find_by_id::<Notification>(&env.db, &auth(&a), note.id)?.id, note.id);
        let err = find_by_id::<Notification>(&env.db, &auth(&b), note.id).unwrap_err();
        assert!(matches!(err, LmsError::Forbidden));
        Ok(())
    }
}
