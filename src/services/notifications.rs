use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, watch};
use tracing::info;
use uuid::Uuid;

use crate::error::{AttendanceError, Result};
use crate::model::notification::{Notification, NotificationKind};
use crate::model::user::Identity;
use crate::store::NotificationStore;

/// How many announcements staff screens keep on display.
pub const FEED_LEN: usize = 50;
const MAX_MESSAGE_LEN: usize = 1000;

/// Announcements posted by admins, newest first.
pub struct NotificationFeed {
    store: Arc<dyn NotificationStore>,
    recent: watch::Sender<Vec<Notification>>,
    write_lock: Mutex<()>,
}

impl NotificationFeed {
    pub async fn init(store: Arc<dyn NotificationStore>) -> Result<Self> {
        let recent = store.recent(FEED_LEN).await?;
        let (recent, _) = watch::channel(recent);
        Ok(Self {
            store,
            recent,
            write_lock: Mutex::new(()),
        })
    }

    pub fn recent(&self) -> Vec<Notification> {
        self.recent.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Notification>> {
        self.recent.subscribe()
    }

    pub async fn post(&self, caller: &Identity, message: &str) -> Result<Notification> {
        caller.ensure_admin("only admins can send notifications")?;
        let message = message.trim();
        if message.is_empty() {
            return Err(AttendanceError::Validation("notification message is empty".to_string()));
        }
        if message.chars().count() > MAX_MESSAGE_LEN {
            return Err(AttendanceError::Validation(format!(
                "notification message is longer than {} characters",
                MAX_MESSAGE_LEN
            )));
        }

        let notification = Notification {
            id: Uuid::new_v4().to_simple().to_string(),
            message: message.to_string(),
            kind: NotificationKind::Announcement,
            sent_by: caller.display_name.clone(),
            sent_by_uid: caller.uid.clone(),
            timestamp: Utc::now(),
        };

        let _guard = self.write_lock.lock().await;
        self.store.insert(&notification).await?;
        self.recent.send_modify(|recent| {
            recent.insert(0, notification.clone());
            recent.truncate(FEED_LEN);
        });

        info!(uid = %caller.uid, notification_id = %notification.id, "Notification sent");
        Ok(notification)
    }
}
