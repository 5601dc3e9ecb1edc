use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, watch};
use tracing::info;

use crate::error::{AttendanceError, Result};
use crate::model::settings::{Settings, SettingsPatch};
use crate::model::user::Identity;
use crate::store::SettingsStore;

/// The event-wide configuration record, injected wherever it is needed.
///
/// Reads are served from the last committed value; `subscribe` hands out a
/// live receiver that observes every later update.
pub struct SettingsRegistry {
    store: Arc<dyn SettingsStore>,
    current: watch::Sender<Settings>,
    write_lock: Mutex<()>,
}

impl SettingsRegistry {
    /// Load the stored record, writing the defaults first if there is none.
    pub async fn init(store: Arc<dyn SettingsStore>) -> Result<Self> {
        let settings = match store.load().await? {
            Some(settings) => settings,
            None => {
                let defaults = Settings {
                    last_modified: Some(Utc::now()),
                    ..Settings::default()
                };
                store.save(&defaults).await?;
                info!("Settings initialised with defaults");
                defaults
            }
        };

        let (current, _) = watch::channel(settings);
        Ok(Self {
            store,
            current,
            write_lock: Mutex::new(()),
        })
    }

    pub fn read(&self) -> Settings {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.current.subscribe()
    }

    /// Merge `patch` over the current record. Last write wins.
    pub async fn update(&self, caller: &Identity, patch: &SettingsPatch) -> Result<Settings> {
        if !caller.is_admin() {
            return Err(AttendanceError::PermissionDenied("only admins can change settings"));
        }

        let _guard = self.write_lock.lock().await;
        let merged = self.read().merged(patch, Utc::now());
        self.store.save(&merged).await?;
        self.current.send_replace(merged.clone());

        info!(
            uid = %caller.uid,
            attendance_enabled = merged.attendance_enabled,
            current_session = %merged.current_session,
            "Settings updated"
        );
        Ok(merged)
    }
}
