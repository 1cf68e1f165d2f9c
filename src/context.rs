use crate::config::LmsConfig;
use crate::db::LmsDb;
use crate::errors::{LmsError, LmsResult};
use crate::notifications::{Notifier, Outbox, UserEvent};

/// What a domain service needs for one request: the locked store, the
/// realtime notifier and the resolved configuration.
#[derive(Clone, Copy)]
pub struct Ctx<'a> {
    pub db: &'a LmsDb,
    pub notifier: &'a Notifier,
    pub config: &'a LmsConfig,
    outbox: Option<&'a Outbox>,
}

impl<'a> Ctx<'a> {
    pub fn new(db: &'a LmsDb, notifier: &'a Notifier, config: &'a LmsConfig) -> Self {
        Self {
            db,
            notifier,
            config,
            outbox: None,
        }
    }

    /// Send `event` now, or hold it until the enclosing transaction commits.
    pub fn publish(&self, event: UserEvent) {
        match self.outbox {
            Some(outbox) => outbox.hold(event),
            None => self.notifier.publish(event),
        }
    }

    /// Run `f` in one transaction. Events published inside reach
    /// subscribers only after the commit; a nested call joins the outer
    /// transaction.
    pub fn transaction<R>(self, f: impl FnOnce(Ctx<'_>) -> LmsResult<R>) -> LmsResult<R> {
        if self.outbox.is_some() {
            return f(self);
        }
        let outbox = Outbox::default();
        let tx = self
            .db
            .conn()
            .unchecked_transaction()
            .map_err(|e| LmsError::Database(e.into()))?;
        let out = f(Ctx {
            db: self.db,
            notifier: self.notifier,
            config: self.config,
            outbox: Some(&outbox),
        })?;
        tx.commit().map_err(|e| LmsError::Database(e.into()))?;
        outbox.release(self.notifier);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Filters;
    use crate::db::fixtures::user;
    use crate::notifications::create_notification;
    use anyhow::Result;
    use lms_common::models::{Notification, NotificationType, Role};

    #[test]
    fn test_events_wait_for_commit() -> Result<()> {
        let db = LmsDb::new_in_memory()?;
        let notifier = Notifier::new();
        let config = LmsConfig::default();
        let ctx = Ctx::new(&db, &notifier, &config);
        let mut rx = notifier.subscribe();
        let u = user(&db, "u@x.test", Role::Student, None)?;

        ctx.transaction(|ctx| {
            create_notification(ctx, u.id, NotificationType::LevelUp, serde_json::json!({}))?;
            assert!(rx.try_recv().is_err());
            Ok(())
        })?;
        assert_eq!(rx.try_recv()?.payload.notification_type, NotificationType::LevelUp);
        Ok(())
    }

    #[test]
    fn test_rollback_drops_events() -> Result<()> {
        let db = LmsDb::new_in_memory()?;
        let notifier = Notifier::new();
        let config = LmsConfig::default();
        let ctx = Ctx::new(&db, &notifier, &config);
        let mut rx = notifier.subscribe();
        let u = user(&db, "u@x.test", Role::Student, None)?;

        let result: LmsResult<()> = ctx.transaction(|ctx| {
            create_notification(ctx, u.id, NotificationType::PointsAwarded, serde_json::json!({}))?;
            Err(LmsError::validation("later step failed"))
        });
        assert!(result.is_err());
        assert!(rx.try_recv().is_err());
        assert_eq!(db.count::<Notification>(&Filters::new())?, 0);
        Ok(())
    }

    #[test]
    fn test_nested_transaction_joins_outer() -> Result<()> {
        let db = LmsDb::new_in_memory()?;
        let notifier = Notifier::new();
        let config = LmsConfig::default();
        let ctx = Ctx::new(&db, &notifier, &config);
        let mut rx = notifier.subscribe();
        let u = user(&db, "u@x.test", Role::Student, None)?;

        let result: LmsResult<()> = ctx.transaction(|outer| {
            outer.transaction(|inner| {
                create_notification(inner, u.id, NotificationType::LevelUp, serde_json::json!({}))?;
                Ok(())
            })?;
            Err(LmsError::Forbidden)
        });
        assert!(result.is_err());
        assert!(rx.try_recv().is_err());
        assert_eq!(db.count::<Notification>(&Filters::new())?, 0);
        Ok(())
    }
}
