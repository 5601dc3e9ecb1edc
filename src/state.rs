//! Wiring: stores -> services -> actix app data.

use std::sync::Arc;

use actix_web::web::{self, Data};
use sqlx::MySqlPool;
use tracing::info;

use crate::auth::identity::{IdentityGate, JwtIdentityGate};
use crate::config::Config;
use crate::error::Result;
use crate::services::attendance_engine::{AttendanceEngine, RetryPolicy};
use crate::services::directory::DirectorySync;
use crate::services::notifications::NotificationFeed;
use crate::services::settings_registry::SettingsRegistry;
use crate::services::teams::TeamService;
use crate::services::users::UserService;
use crate::store::memory::{
    MemoryNotificationStore, MemorySettingsStore, MemoryTeamStore, MemoryUserStore,
};
use crate::store::mysql::{
    MySqlNotificationStore, MySqlSettingsStore, MySqlTeamStore, MySqlUserStore,
};
use crate::store::{NotificationStore, SettingsStore, TeamStore, UserStore};

/// The collections behind the services.
pub struct Stores {
    pub teams: Arc<dyn TeamStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub users: Arc<dyn UserStore>,
    pub notifications: Arc<dyn NotificationStore>,
}

impl Stores {
    pub fn mysql(pool: MySqlPool) -> Self {
        Self {
            teams: Arc::new(MySqlTeamStore::new(pool.clone())),
            settings: Arc::new(MySqlSettingsStore::new(pool.clone())),
            users: Arc::new(MySqlUserStore::new(pool.clone())),
            notifications: Arc::new(MySqlNotificationStore::new(pool)),
        }
    }

    pub fn memory() -> Self {
        Self {
            teams: Arc::new(MemoryTeamStore::default()),
            settings: Arc::new(MemorySettingsStore::default()),
            users: Arc::new(MemoryUserStore::default()),
            notifications: Arc::new(MemoryNotificationStore::default()),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Data<AttendanceEngine>,
    pub settings: Data<SettingsRegistry>,
    pub directory: Data<DirectorySync>,
    pub teams: Data<TeamService>,
    pub users: Data<UserService>,
    pub notifications: Data<NotificationFeed>,
    pub gate: Arc<JwtIdentityGate>,
}

impl AppState {
    pub async fn build(config: &Config, stores: Stores) -> Result<Self> {
        let settings = Arc::new(SettingsRegistry::init(stores.settings).await?);

        let engine = AttendanceEngine::new(
            stores.teams.clone(),
            settings.clone(),
            RetryPolicy {
                attempts: config.mark_retry_attempts,
                backoff: config.mark_retry_backoff,
            },
        );

        let gate = Arc::new(JwtIdentityGate::new(
            config.jwt_secret.clone(),
            stores.users.clone(),
            config.identity_cache_ttl,
            config.master_admin_email.clone(),
        ));
        let users = UserService::new(stores.users, gate.clone());
        let notifications = NotificationFeed::init(stores.notifications).await?;

        info!(page_size = config.page_size, "Services ready");
        Ok(Self {
            engine: Data::new(engine),
            settings: Data::from(settings),
            directory: Data::new(DirectorySync::new(stores.teams.clone(), config.page_size)),
            teams: Data::new(TeamService::new(stores.teams)),
            users: Data::new(users),
            notifications: Data::new(notifications),
            gate,
        })
    }

    /// Register every service as app data.
    pub fn install(&self, cfg: &mut web::ServiceConfig) {
        let gate: Arc<dyn IdentityGate> = self.gate.clone();
        cfg.app_data(self.engine.clone())
            .app_data(self.settings.clone())
            .app_data(self.directory.clone())
            .app_data(self.teams.clone())
            .app_data(self.users.clone())
            .app_data(self.notifications.clone())
            .app_data(Data::from(gate));
    }
}
