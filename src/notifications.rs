//! Persisted notifications with a realtime push per user.

use std::cell::RefCell;

use lms_common::models::{Notification, NotificationType};
use lms_common::time::now_ts;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::context::Ctx;
use crate::db::{Filters, LmsDb, Page, Paginated};
use crate::errors::{LmsError, LmsResult};

const CHANNEL_CAPACITY: usize = 256;

/// Realtime payload pushed to a user's WebSocket.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NotificationPayload {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub data: serde_json::Value,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct UserEvent {
    pub user_id: i64,
    pub payload: NotificationPayload,
}

/// Name of a user's realtime channel.
pub fn channel_name(user_id: i64) -> String {
    format!("user-{user_id}")
}

/// Fan-out of user events to every connected socket.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<UserEvent>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UserEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: UserEvent) {
        // No receivers just means nobody is connected.
        if self.tx.send(event).is_err() {
            debug!("no realtime subscribers");
        }
    }
}

/// Events held back until a transaction commits.
#[derive(Default)]
pub struct Outbox {
    held: RefCell<Vec<UserEvent>>,
}

impl Outbox {
    pub(crate) fn hold(&self, event: UserEvent) {
        self.held.borrow_mut().push(event);
    }

    pub(crate) fn release(self, notifier: &Notifier) {
        for event in self.held.into_inner() {
            notifier.publish(event);
        }
    }
}

/// Store a notification and push it to the user's channel.
pub fn create_notification(
    ctx: Ctx<'_>,
    user_id: i64,
    notification_type: NotificationType,
    data: serde_json::Value,
) -> LmsResult<Notification> {
    let notification = ctx
        .db
        .create(&Notification {
            id: 0,
            user_id,
            notification_type,
            data,
            created_at: now_ts(),
            read_at: None,
        })
        .map_err(LmsError::from_storage)?;
    debug!(
        channel = %channel_name(user_id),
        kind = notification_type.as_str(),
        "notification created"
    );
    ctx.publish(UserEvent {
        user_id,
        payload: NotificationPayload {
            notification_type,
            data: notification.data.clone(),
            created_at: notification.created_at.clone(),
        },
    });
    Ok(notification)
}

/// The user's notifications, unread first, newest first within each group.
pub fn list_for_user(db: &LmsDb, user_id: i64, page: Page) -> LmsResult<Paginated<Notification>> {
    let page = crate::collections::check_page(page)?;
    Ok(db.list_ordered(
        &Filters::new().eq("user_id", user_id),
        "(read_at IS NOT NULL), created_at DESC, id DESC",
        page,
    )?)
}

/// Mark one of the user's notifications as read.
pub fn mark_read(db: &LmsDb, user_id: i64, id: i64) -> LmsResult<Notification> {
    let notification = db
        .get::<Notification>(id)?
        .ok_or(LmsError::not_found("Notification", id))?;
    if notification.user_id != user_id {
        return Err(LmsError::not_found("Notification", id));
    }
    db.mark_notification_read(id, &now_ts())?;
    db.get::<Notification>(id)?
        .ok_or(LmsError::not_found("Notification", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LmsConfig;
    use crate::db::fixtures::user;
    use anyhow::Result;
    use lms_common::models::Role;

    #[test]
    fn test_create_notification_persists_and_publishes() -> Result<()> {
        let db = LmsDb::new_in_memory()?;
        let notifier = Notifier::new();
        let config = LmsConfig::default();
        let mut rx = notifier.subscribe();
        let u = user(&db, "u@x.test", Role::Student, None)?;

        let n = create_notification(
            Ctx::new(&db, &notifier, &config),
            u.id,
            NotificationType::LevelUp,
            serde_json::json!({"level": 2}),
        )?;
        assert_eq!(n.user_id, u.id);

        let event = rx.try_recv()?;
        assert_eq!(event.user_id, u.id);
        assert_eq!(event.payload.notification_type, NotificationType::LevelUp);
        assert_eq!(event.payload.data["level"], 2);
        Ok(())
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let notifier = Notifier::new();
        notifier.publish(UserEvent {
            user_id: 1,
            payload: NotificationPayload {
                notification_type: NotificationType::PointsAwarded,
                data: serde_json::json!({}),
                created_at: now_ts(),
            },
        });
    }

    #[test]
    fn test_list_puts_unread_first() -> Result<()> {
        let db = LmsDb::new_in_memory()?;
        let notifier = Notifier::new();
        let config = LmsConfig::default();
        let ctx = Ctx::new(&db, &notifier, &config);
        let u = user(&db, "u@x.test", Role::Student, None)?;
        let first = create_notification(ctx, u.id, NotificationType::LevelUp, serde_json::json!({}))?;
        let second = create_notification(ctx, u.id, NotificationType::BadgeAwarded, serde_json::json!({}))?;
        mark_read(&db, u.id, second.id)?;

        let page = list_for_user(&db, u.id, Page::default())?;
        assert_eq!(page.docs[0].id, first.id);
        assert!(page.docs[1].read_at.is_some());
        Ok(())
    }

    #[test]
    fn test_mark_read_rejects_other_users() -> Result<()> {
        let db = LmsDb::new_in_memory()?;
        let notifier = Notifier::new();
        let config = LmsConfig::default();
        let a = user(&db, "a@x.test", Role::Student, None)?;
        let b = user(&db, "b@x.test", Role::Student, None)?;
        let n = create_notification(Ctx::new(&db, &notifier, &config), a.id, NotificationType::LevelUp, serde_json::json!({}))?;
        assert!(matches!(mark_read(&db, b.id, n.id), Err(LmsError::NotFound { .. })));
        Ok(())
    }

    #[test]
    fn test_channel_name() {
        assert_eq!(channel_name(42), "user-42");
    }
}
