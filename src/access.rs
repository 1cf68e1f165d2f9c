//! Declarative access control.
//!
//! Every collection maps each operation to an [`Access`] decision for the
//! calling user: allowed, denied, or restricted to documents matching a
//! [`Scope`]. Scopes compile to a single SQL clause with one bound id so the
//! storage layer can filter list queries and check single documents.

use lms_common::models::{Role, User};
use serde::Serialize;
use tracing::debug;

use crate::errors::{LmsError, LmsResult};

/// The authenticated caller of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuthUser {
    pub id: i64,
    pub role: Role,
    pub tenant_id: Option<i64>,
}

impl From<&User> for AuthUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            role: user.role,
            tenant_id: user.tenant_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Tenants,
    Users,
    StudentSettings,
    Media,
    Courses,
    Modules,
    Lessons,
    Enrollments,
    Progress,
    Badges,
    Achievements,
    Levels,
    Leaderboards,
    Points,
    Streaks,
    Notifications,
}

impl Collection {
    pub fn table(&self) -> &'static str {
        match self {
            Self::Tenants => "tenants",
            Self::Users => "users",
            Self::StudentSettings => "student_settings",
            Self::Media => "media",
            Self::Courses => "courses",
            Self::Modules => "modules",
            Self::Lessons => "lessons",
            Self::Enrollments => "enrollments",
            Self::Progress => "progress",
            Self::Badges => "badges",
            Self::Achievements => "achievements",
            Self::Levels => "levels",
            Self::Leaderboards => "leaderboards",
            Self::Points => "points",
            Self::Streaks => "streaks",
            Self::Notifications => "notifications",
        }
    }

    /// Singular display name used in error messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Tenants => "Tenant",
            Self::Users => "User",
            Self::StudentSettings => "Student settings",
            Self::Media => "Media",
            Self::Courses => "Course",
            Self::Modules => "Module",
            Self::Lessons => "Lesson",
            Self::Enrollments => "Enrollment",
            Self::Progress => "Progress",
            Self::Badges => "Badge",
            Self::Achievements => "Achievement",
            Self::Levels => "Level",
            Self::Leaderboards => "Leaderboard",
            Self::Points => "Point",
            Self::Streaks => "Streak",
            Self::Notifications => "Notification",
        }
    }
}

/// A document filter bound to one id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// `tenant_id` equals.
    Tenant(i64),
    /// Owned by the tenant or marked global.
    TenantOrGlobal(i64),
    /// `student_id` equals.
    Student(i64),
    /// The document's student belongs to the tenant.
    StudentTenant(i64),
    /// The document's course belongs to the tenant.
    CourseTenant(i64),
    /// The document's module's course belongs to the tenant.
    ModuleCourseTenant(i64),
    /// `instructor_id` equals.
    Instructor(i64),
    /// The document's course is taught by the instructor.
    CourseInstructor(i64),
    /// The document's module's course is taught by the instructor.
    ModuleCourseInstructor(i64),
    /// The document's own id equals.
    Id(i64),
    /// `user_id` equals.
    User(i64),
}

impl Scope {
    /// SQL clause (one `?` placeholder) and its bound value.
    pub fn clause(&self) -> (&'static str, i64) {
        match *self {
            Self::Tenant(t) => ("tenant_id = ?", t),
            Self::TenantOrGlobal(t) => ("(tenant_id = ? OR is_global = 1)", t),
            Self::Student(u) => ("student_id = ?", u),
            Self::StudentTenant(t) => (
                "student_id IN (SELECT id FROM users WHERE tenant_id = ?)",
                t,
            ),
            Self::CourseTenant(t) => (
                "course_id IN (SELECT id FROM courses WHERE tenant_id = ?)",
                t,
            ),
            Self::ModuleCourseTenant(t) => (
                "module_id IN (SELECT m.id FROM modules m JOIN courses c ON c.id = m.course_id WHERE c.tenant_id = ?)",
                t,
            ),
            Self::Instructor(u) => ("instructor_id = ?", u),
            Self::CourseInstructor(u) => (
                "course_id IN (SELECT id FROM courses WHERE instructor_id = ?)",
                u,
            ),
            Self::ModuleCourseInstructor(u) => (
                "module_id IN (SELECT m.id FROM modules m JOIN courses c ON c.id = m.course_id WHERE c.instructor_id = ?)",
                u,
            ),
            Self::Id(id) => ("id = ?", id),
            Self::User(u) => ("user_id = ?", u),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allow,
    Deny,
    Scoped(Scope),
}

impl From<bool> for Access {
    fn from(allowed: bool) -> Self {
        if allowed { Access::Allow } else { Access::Deny }
    }
}

// ── Role predicates ───────────────────────────────────────────────────

pub fn has_role(user: Option<&AuthUser>, role: Role) -> bool {
    user.is_some_and(|u| u.role == role)
}

pub fn is_admin(user: Option<&AuthUser>) -> bool {
    has_role(user, Role::Admin)
}

pub fn is_instructor(user: Option<&AuthUser>) -> bool {
    has_role(user, Role::Instructor)
}

pub fn is_student(user: Option<&AuthUser>) -> bool {
    has_role(user, Role::Student)
}

pub fn is_admin_or_instructor(user: Option<&AuthUser>) -> bool {
    is_admin(user) || is_instructor(user)
}

pub fn is_same_user(user: Option<&AuthUser>, id: i64) -> bool {
    user.is_some_and(|u| u.id == id)
}

pub fn is_same_tenant(user: Option<&AuthUser>, tenant_id: Option<i64>) -> bool {
    match (user.and_then(|u| u.tenant_id), tenant_id) {
        (Some(mine), Some(theirs)) => mine == theirs,
        _ => false,
    }
}

pub fn is_admin_or_self(user: Option<&AuthUser>, id: i64) -> bool {
    is_admin(user) || is_same_user(user, id)
}

/// Admins and instructors always; students only for their own id.
pub fn is_admin_or_instructor_or_self(user: Option<&AuthUser>, id: i64) -> bool {
    is_admin_or_instructor(user) || (is_student(user) && is_same_user(user, id))
}

// ── Collection rules ──────────────────────────────────────────────────

/// Scope a non-admin caller to their tenant; callers without a tenant see
/// nothing.
fn tenant_scope(user: &AuthUser, scope: fn(i64) -> Scope) -> Access {
    match user.tenant_id {
        Some(t) => Access::Scoped(scope(t)),
        None => Access::Deny,
    }
}

/// Decide what `user` may do with `collection` for `op`.
pub fn rules(collection: Collection, op: Operation, user: Option<&AuthUser>) -> Access {
    use Collection as C;
    use Operation as Op;

    let Some(u) = user else {
        return Access::Deny;
    };
    let admin = u.role == Role::Admin;
    if admin {
        // Points and streaks are written by the system only, even for admins.
        return match (collection, op) {
            (C::Points | C::Streaks | C::Notifications, Op::Create) => Access::Deny,
            (C::Points | C::Streaks, Op::Update) => Access::Deny,
            (C::Notifications, Op::Read | Op::Update) => Access::Scoped(Scope::User(u.id)),
            _ => Access::Allow,
        };
    }
    let instructor = u.role == Role::Instructor;

    match (collection, op) {
        (_, Op::Delete) => Access::Deny,

        (C::Tenants, Op::Read) => tenant_scope(u, Scope::Id),
        (C::Tenants, _) => Access::Deny,

        (C::Users, Op::Read) => tenant_scope(u, Scope::Tenant),
        (C::Users, Op::Update) => Access::Scoped(Scope::Id(u.id)),
        (C::Users, _) => Access::Deny,

        (C::StudentSettings, Op::Create) => Access::Allow,
        (C::StudentSettings, _) => Access::Scoped(Scope::User(u.id)),

        (C::Media, Op::Read) => tenant_scope(u, Scope::TenantOrGlobal),
        (C::Media, _) => instructor.into(),

        (C::Courses, Op::Read) => tenant_scope(u, Scope::Tenant),
        (C::Courses, Op::Create) => instructor.into(),
        (C::Courses, Op::Update) if instructor => Access::Scoped(Scope::Instructor(u.id)),
        (C::Courses, _) => Access::Deny,

        (C::Modules, Op::Read) => tenant_scope(u, Scope::CourseTenant),
        (C::Modules, Op::Create) => instructor.into(),
        (C::Modules, Op::Update) if instructor => Access::Scoped(Scope::CourseInstructor(u.id)),
        (C::Modules, _) => Access::Deny,

        (C::Lessons, Op::Read) => tenant_scope(u, Scope::ModuleCourseTenant),
        (C::Lessons, Op::Create) => instructor.into(),
        (C::Lessons, Op::Update) if instructor => {
            Access::Scoped(Scope::ModuleCourseInstructor(u.id))
        }
        (C::Lessons, _) => Access::Deny,

        (C::Enrollments, Op::Create) if instructor => Access::Allow,
        (C::Enrollments, _) if instructor => tenant_scope(u, Scope::CourseTenant),
        (C::Enrollments, _) => Access::Scoped(Scope::Student(u.id)),

        (C::Progress, Op::Create) => instructor.into(),
        (C::Progress, _) if instructor => tenant_scope(u, Scope::StudentTenant),
        (C::Progress, _) => Access::Scoped(Scope::Student(u.id)),

        (C::Badges | C::Achievements | C::Levels | C::Leaderboards, Op::Read) => {
            tenant_scope(u, Scope::TenantOrGlobal)
        }
        (C::Badges | C::Achievements | C::Levels | C::Leaderboards, _) => Access::Deny,

        (C::Points | C::Streaks, Op::Read) if instructor => tenant_scope(u, Scope::StudentTenant),
        (C::Points | C::Streaks, Op::Read) => Access::Scoped(Scope::Student(u.id)),
        (C::Points | C::Streaks, _) => Access::Deny,

        (C::Notifications, Op::Read | Op::Update) => Access::Scoped(Scope::User(u.id)),
        (C::Notifications, _) => Access::Deny,
    }
}

/// Resolve a decision for `user` into the scope to apply, or the error a
/// denied caller gets: 401 without a user, 403 otherwise.
pub fn require(
    collection: Collection,
    op: Operation,
    user: Option<&AuthUser>,
) -> LmsResult<Option<Scope>> {
    let access = rules(collection, op, user);
    debug!(
        collection = collection.table(),
        ?op,
        user_id = user.map(|u| u.id),
        ?access,
        "access decision"
    );
    match access {
        Access::Allow => Ok(None),
        Access::Scoped(scope) => Ok(Some(scope)),
        Access::Deny if user.is_none() => Err(LmsError::Unauthorized),
        Access::Deny => Err(LmsError::Forbidden),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> AuthUser {
        AuthUser { id: 1, role: Role::Admin, tenant_id: None }
    }

    fn instructor() -> AuthUser {
        AuthUser { id: 2, role: Role::Instructor, tenant_id: Some(10) }
    }

    fn student() -> AuthUser {
        AuthUser { id: 3, role: Role::Student, tenant_id: Some(10) }
    }

    #[test]
    fn anonymous_is_denied_everything() {
        for op in [Operation::Read, Operation::Create, Operation::Update, Operation::Delete] {
            assert_eq!(rules(Collection::Courses, op, None), Access::Deny);
        }
    }

    #[test]
    fn admin_can_do_anything_but_write_system_ledgers() {
        let a = admin();
        assert_eq!(rules(Collection::Courses, Operation::Delete, Some(&a)), Access::Allow);
        assert_eq!(rules(Collection::Points, Operation::Read, Some(&a)), Access::Allow);
        assert_eq!(rules(Collection::Points, Operation::Delete, Some(&a)), Access::Allow);
        assert_eq!(rules(Collection::Points, Operation::Create, Some(&a)), Access::Deny);
        assert_eq!(rules(Collection::Points, Operation::Update, Some(&a)), Access::Deny);
        assert_eq!(rules(Collection::Streaks, Operation::Create, Some(&a)), Access::Deny);
    }

    #[test]
    fn instructor_updates_only_own_courses() {
        let i = instructor();
        assert_eq!(rules(Collection::Courses, Operation::Create, Some(&i)), Access::Allow);
        assert_eq!(
            rules(Collection::Courses, Operation::Update, Some(&i)),
            Access::Scoped(Scope::Instructor(2))
        );
        assert_eq!(
            rules(Collection::Lessons, Operation::Update, Some(&i)),
            Access::Scoped(Scope::ModuleCourseInstructor(2))
        );
        assert_eq!(rules(Collection::Courses, Operation::Delete, Some(&i)), Access::Deny);
    }

    #[test]
    fn student_reads_own_ledgers_and_tenant_catalog() {
        let s = student();
        assert_eq!(
            rules(Collection::Points, Operation::Read, Some(&s)),
            Access::Scoped(Scope::Student(3))
        );
        assert_eq!(
            rules(Collection::Badges, Operation::Read, Some(&s)),
            Access::Scoped(Scope::TenantOrGlobal(10))
        );
        assert_eq!(rules(Collection::Badges, Operation::Create, Some(&s)), Access::Deny);
        assert_eq!(rules(Collection::Courses, Operation::Create, Some(&s)), Access::Deny);
    }

    #[test]
    fn student_enrollment_create_is_scoped_to_self() {
        let s = student();
        assert_eq!(
            rules(Collection::Enrollments, Operation::Create, Some(&s)),
            Access::Scoped(Scope::Student(3))
        );
    }

    #[test]
    fn instructor_sees_tenant_enrollments_and_progress() {
        let i = instructor();
        assert_eq!(
            rules(Collection::Enrollments, Operation::Read, Some(&i)),
            Access::Scoped(Scope::CourseTenant(10))
        );
        assert_eq!(
            rules(Collection::Progress, Operation::Update, Some(&i)),
            Access::Scoped(Scope::StudentTenant(10))
        );
    }

    #[test]
    fn users_without_tenant_see_no_tenant_data() {
        let orphan = AuthUser { id: 9, role: Role::Student, tenant_id: None };
        assert_eq!(rules(Collection::Courses, Operation::Read, Some(&orphan)), Access::Deny);
        assert_eq!(
            rules(Collection::Users, Operation::Update, Some(&orphan)),
            Access::Scoped(Scope::Id(9))
        );
    }

    #[test]
    fn role_predicates() {
        let a = admin();
        let i = instructor();
        let s = student();
        assert!(is_admin(Some(&a)));
        assert!(!is_admin(None));
        assert!(is_admin_or_instructor(Some(&i)));
        assert!(!is_admin_or_instructor(Some(&s)));
        assert!(is_admin_or_self(Some(&s), 3));
        assert!(!is_admin_or_self(Some(&s), 4));
        assert!(is_admin_or_instructor_or_self(Some(&i), 99));
        assert!(is_admin_or_instructor_or_self(Some(&s), 3));
        assert!(!is_admin_or_instructor_or_self(Some(&s), 4));
        assert!(is_same_tenant(Some(&s), Some(10)));
        assert!(!is_same_tenant(Some(&a), Some(10)));
    }

    #[test]
    fn scope_clauses_bind_one_value() {
        let (sql, value) = Scope::TenantOrGlobal(7).clause();
        assert_eq!(sql.matches('?').count(), 1);
        assert_eq!(value, 7);
        let (sql, _) = Scope::ModuleCourseTenant(7).clause();
        assert!(sql.contains("JOIN courses"));
    }

    #[test]
    fn require_maps_denials_to_errors() {
        let s = student();
        assert!(matches!(
            require(Collection::Courses, Operation::Read, None),
            Err(LmsError::Unauthorized)
        ));
        assert!(matches!(
            require(Collection::Courses, Operation::Create, Some(&s)),
            Err(LmsError::Forbidden)
        ));
        assert_eq!(
            require(Collection::Courses, Operation::Read, Some(&s)).unwrap(),
            Some(Scope::Tenant(10))
        );
        assert_eq!(
            require(Collection::Courses, Operation::Read, Some(&admin())).unwrap(),
            None
        );
    }
}
