//! Password login, sessions and API keys.
//!
//! Passwords are stored as `sha256(salt || password)` in hex. A successful
//! login opens a session whose token is sent back as a bearer token;
//! integrations use a per-user API key instead.

use chrono::{DateTime, Duration, Utc};
use lms_common::models::{Role, User};
use lms_common::time::{format_ts, parse_ts};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::access::{self, AuthUser};
use crate::collections::{self, UserInput};
use crate::config::AuthSection;
use crate::context::Ctx;
use crate::db::LmsDb;
use crate::errors::{LmsError, LmsResult};

/// Prefix of an API key `Authorization` header.
pub const API_KEY_SCHEME: &str = "users API-Key ";
pub const BEARER_SCHEME: &str = "Bearer ";

pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn new_salt() -> String {
    Uuid::new_v4().simple().to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub token: String,
    pub expires_at: String,
    pub user: User,
}

/// Check a password and open a session.
///
/// Each wrong password counts toward the lockout; reaching the configured
/// maximum locks the account for `lock_time_secs`.
pub fn login(
    db: &LmsDb,
    config: &AuthSection,
    email: &str,
    password: &str,
    now: DateTime<Utc>,
) -> LmsResult<Session> {
    let email = email.trim().to_lowercase();
    let user = db
        .user_by_email(&email)?
        .ok_or(LmsError::InvalidCredentials)?;
    let credentials = db
        .credentials(user.id)?
        .ok_or(LmsError::InvalidCredentials)?;

    let mut previous_attempts = credentials.login_attempts;
    if let Some(until) = &credentials.lock_until {
        let locked = parse_ts(until).map_err(|e| LmsError::Other(anyhow::anyhow!(e)))?;
        if locked > now {
            warn!(user_id = user.id, until = %until, "login to locked account");
            return Err(LmsError::AccountLocked {
                until: until.clone(),
            });
        }
        // An expired lock starts a fresh count.
        previous_attempts = 0;
    }

    if credentials.password_hash.is_empty()
        || hash_password(&credentials.salt, password) != credentials.password_hash
    {
        let attempts = previous_attempts + 1;
        let lock_until = (config.max_login_attempts > 0 && attempts >= config.max_login_attempts)
            .then(|| format_ts(&(now + Duration::seconds(config.lock_time_secs))));
        db.record_failed_login(user.id, attempts, lock_until.as_deref())?;
        warn!(user_id = user.id, attempts, locked = lock_until.is_some(), "failed login");
        return Err(LmsError::InvalidCredentials);
    }

    let at = format_ts(&now);
    db.record_successful_login(user.id, &at)?;
    db.purge_expired_sessions(&at)?;
    let token = Uuid::new_v4().to_string();
    let expires_at = format_ts(&(now + Duration::seconds(config.token_ttl_secs)));
    db.create_session(&token, user.id, &expires_at, &at)?;
    info!(user_id = user.id, "login");

    let user = db.get::<User>(user.id)?.unwrap_or(user);
    Ok(Session {
        token,
        expires_at,
        user,
    })
}

pub fn logout(db: &LmsDb, token: &str) -> LmsResult<bool> {
    Ok(db.delete_session(token)?)
}

/// Resolve an `Authorization` header value to the calling user.
pub fn authenticate(db: &LmsDb, header: &str, now: DateTime<Utc>) -> LmsResult<AuthUser> {
    let user = if let Some(token) = header.strip_prefix(BEARER_SCHEME) {
        db.session_user(token.trim(), &format_ts(&now))?
    } else if let Some(key) = header.strip_prefix(API_KEY_SCHEME) {
        db.user_by_api_key(key.trim())?
    } else {
        None
    };
    user.as_ref()
        .map(AuthUser::from)
        .ok_or(LmsError::Unauthorized)
}

/// Issue a fresh API key for `user_id`, replacing any previous one.
pub fn generate_api_key(db: &LmsDb, caller: &AuthUser, user_id: i64) -> LmsResult<String> {
    if !access::is_admin_or_self(Some(caller), user_id) {
        return Err(LmsError::Forbidden);
    }
    if db.get::<User>(user_id)?.is_none() {
        return Err(LmsError::not_found("User", user_id));
    }
    let key = Uuid::new_v4().simple().to_string();
    db.set_api_key(user_id, &key)?;
    info!(user_id, by = caller.id, "API key rotated");
    Ok(key)
}

pub fn set_password(db: &LmsDb, user_id: i64, password: &str) -> LmsResult<()> {
    if password.is_empty() {
        return Err(LmsError::validation("Password is required"));
    }
    let salt = new_salt();
    db.set_password(user_id, &hash_password(&salt, password), &salt)?;
    Ok(())
}

/// Create a user through the users collection and give it a password.
pub fn create_user(
    ctx: Ctx<'_>,
    caller: &AuthUser,
    input: UserInput,
    password: &str,
) -> LmsResult<User> {
    if password.is_empty() {
        return Err(LmsError::validation("Password is required"));
    }
    let user: User = collections::create(ctx, caller, input)?;
    set_password(ctx.db, user.id, password)?;
    Ok(user)
}

/// Create the first admin of an empty installation. Returns `None` when
/// users already exist.
pub fn bootstrap_admin(
    ctx: Ctx<'_>,
    email: &str,
    name: &str,
    password: &str,
) -> LmsResult<Option<User>> {
    if ctx.db.count_users()? > 0 {
        return Ok(None);
    }
    let system = AuthUser {
        id: 0,
        role: Role::Admin,
        tenant_id: None,
    };
    let input = UserInput {
        email: email.to_string(),
        name: name.to_string(),
        role: Some(Role::Admin),
        tenant_id: None,
        avatar_id: None,
    };
    let user = create_user(ctx, &system, input, password)?;
    info!(user_id = user.id, email = %user.email, "bootstrap admin created");
    Ok(Some(user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LmsConfig;
    use crate::db::fixtures::*;
    use crate::notifications::Notifier;
    use anyhow::{Context, Result};

    fn at(s: &str) -> DateTime<Utc> {
        parse_ts(s).unwrap()
    }

    fn with_password(db: &LmsDb, email: &str, password: &str) -> Result<User> {
        let u = user(db, email, Role::Student, None)?;
        set_password(db, u.id, password)?;
        Ok(u)
    }

    #[test]
    fn test_hash_is_salted_sha256_hex() {
        let h = hash_password("salt", "secret");
        assert_eq!(h.len(), 64);
        assert_eq!(h, hash_password("salt", "secret"));
        assert_ne!(h, hash_password("pepper", "secret"));
    }

    #[test]
    fn test_login_opens_session() -> Result<()> {
        let db = LmsDb::new_in_memory()?;
        let config = AuthSection::default();
        let u = with_password(&db, "s@x.test", "hunter22")?;
        let now = at("2024-05-01T12:00:00Z");

        let session = login(&db, &config, "S@X.test", "hunter22", now)?;
        assert_eq!(session.user.id, u.id);
        assert_eq!(session.expires_at, "2024-05-01T14:00:00Z");
        assert_eq!(session.user.last_active.as_deref(), Some("2024-05-01T12:00:00Z"));

        let header = format!("Bearer {}", session.token);
        assert_eq!(authenticate(&db, &header, now)?.id, u.id);
        let expired = authenticate(&db, &header, at("2024-05-01T15:00:00Z")).unwrap_err();
        assert!(matches!(expired, LmsError::Unauthorized));

        assert!(logout(&db, &session.token)?);
        assert!(matches!(authenticate(&db, &header, now), Err(LmsError::Unauthorized)));
        Ok(())
    }

    #[test]
    fn test_repeated_failures_lock_account() -> Result<()> {
        let db = LmsDb::new_in_memory()?;
        let config = AuthSection {
            max_login_attempts: 2,
            lock_time_secs: 600,
            ..AuthSection::default()
        };
        with_password(&db, "s@x.test", "right")?;
        let now = at("2024-05-01T12:00:00Z");

        for _ in 0..2 {
            let err = login(&db, &config, "s@x.test", "wrong", now).unwrap_err();
            assert!(matches!(err, LmsError::InvalidCredentials));
        }
        let err = login(&db, &config, "s@x.test", "right", now).unwrap_err();
        assert!(matches!(err, LmsError::AccountLocked { .. }));

        // The lock expires.
        login(&db, &config, "s@x.test", "right", at("2024-05-01T12:11:00Z"))?;
        Ok(())
    }

    #[test]
    fn test_expired_lock_restarts_attempt_count() -> Result<()> {
        let db = LmsDb::new_in_memory()?;
        let config = AuthSection {
            max_login_attempts: 3,
            lock_time_secs: 600,
            ..AuthSection::default()
        };
        let u = with_password(&db, "s@x.test", "right")?;
        let now = at("2024-05-01T12:00:00Z");
        for _ in 0..3 {
            login(&db, &config, "s@x.test", "wrong", now).unwrap_err();
        }
        assert!(db.credentials(u.id)?.and_then(|c| c.lock_until).is_some());

        // One typo after the lock runs out does not lock again.
        let later = at("2024-05-01T12:11:00Z");
        let err = login(&db, &config, "s@x.test", "wrong", later).unwrap_err();
        assert!(matches!(err, LmsError::InvalidCredentials));
        let creds = db.credentials(u.id)?.context("credentials missing")?;
        assert_eq!(creds.login_attempts, 1);
        assert!(creds.lock_until.is_none());

        login(&db, &config, "s@x.test", "right", later)?;
        Ok(())
    }

    #[test]
    fn test_unknown_email_is_invalid_credentials() -> Result<()> {
        let db = LmsDb::new_in_memory()?;
        let err = login(&db, &AuthSection::default(), "ghost@x.test", "pw", Utc::now()).unwrap_err();
        assert!(matches!(err, LmsError::InvalidCredentials));
        Ok(())
    }

    #[test]
    fn test_api_key_rotation() -> Result<()> {
        let db = LmsDb::new_in_memory()?;
        let a = user(&db, "a@x.test", Role::Student, None)?;
        let b = user(&db, "b@x.test", Role::Student, None)?;

        let key = generate_api_key(&db, &AuthUser::from(&a), a.id)?;
        let header = format!("users API-Key {key}");
        assert_eq!(authenticate(&db, &header, Utc::now())?.id, a.id);

        let err = generate_api_key(&db, &AuthUser::from(&b), a.id).unwrap_err();
        assert!(matches!(err, LmsError::Forbidden));

        let rotated = generate_api_key(&db, &AuthUser::from(&a), a.id)?;
        assert_ne!(rotated, key);
        assert!(authenticate(&db, &header, Utc::now()).is_err());
        Ok(())
    }

    #[test]
    fn test_bootstrap_admin_only_once() -> Result<()> {
        let db = LmsDb::new_in_memory()?;
        let notifier = Notifier::new();
        let config = LmsConfig::default();
        let ctx = Ctx::new(&db, &notifier, &config);

        let admin = bootstrap_admin(ctx, "root@x.test", "Root", "changeme")?;
        assert_eq!(admin.map(|u| u.role), Some(Role::Admin));
        assert!(bootstrap_admin(ctx, "other@x.test", "Other", "pw")?.is_none());

        login(&db, &config.auth, "root@x.test", "changeme", Utc::now())?;
        Ok(())
    }
}
