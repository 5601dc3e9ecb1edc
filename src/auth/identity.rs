//! Resolves bearer credentials into caller identities.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use moka::future::Cache;
use sqlx::MySqlPool;
use tracing::{debug, info};

use crate::auth::jwt::verify_token;
use crate::error::{AttendanceError, Result};
use crate::model::role::Role;
use crate::model::user::{Identity, User};
use crate::models::Claims;
use crate::store::UserStore;
use crate::store::mysql::UserRow;

const CACHE_CAPACITY: u64 = 10_000;

/// Turns a credential into `{uid, displayName, role, approved}`.
///
/// Every authorization decision downstream trusts the returned role as is.
#[async_trait]
pub trait IdentityGate: Send + Sync {
    async fn resolve(&self, credential: &str) -> Result<Identity>;

    /// Drop any cached identity for `uid` so the next request reloads it.
    async fn invalidate(&self, uid: &str);
}

pub struct JwtIdentityGate {
    secret: String,
    users: Arc<dyn UserStore>,
    cache: Cache<String, Identity>,
    master_admin_email: Option<String>,
}

impl JwtIdentityGate {
    pub fn new(
        secret: String,
        users: Arc<dyn UserStore>,
        ttl: Duration,
        master_admin_email: Option<String>,
    ) -> Self {
        Self {
            secret,
            users,
            cache: Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(ttl)
                .build(),
            master_admin_email: master_admin_email.map(|e| e.trim().to_lowercase()),
        }
    }

    fn is_master_admin(&self, email: Option<&str>) -> bool {
        match (email, &self.master_admin_email) {
            (Some(email), Some(master)) => email.trim().eq_ignore_ascii_case(master),
            _ => false,
        }
    }

    /// Load the caller's user row, registering first-time callers as
    /// unapproved coordinators (or as the approved master admin).
    async fn load(&self, claims: &Claims) -> Result<Identity> {
        if let Some(user) = self.users.get(&claims.sub).await? {
            return Ok(user.identity());
        }

        let master = self.is_master_admin(claims.email.as_deref());
        let email = claims.email.clone().unwrap_or_default();
        let name = claims
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| claims.email.clone())
            .unwrap_or_else(|| claims.sub.clone());

        let user = self
            .users
            .insert_if_absent(User {
                uid: claims.sub.clone(),
                name,
                email,
                role: if master { Role::Admin } else { Role::Coordinator },
                approved: master,
                created_at: Utc::now(),
            })
            .await?;
        info!(uid = %user.uid, role = %user.role, approved = user.approved, "Registered new user");
        Ok(user.identity())
    }

    /// Preload approved users into the cache (batched).
    pub async fn warm_up(&self, pool: &MySqlPool, batch_size: usize) -> AnyResult<usize> {
        let mut stream = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT uid, name, email, role, approved, created_at
            FROM users
            WHERE approved = TRUE
            "#,
        )
        .fetch(pool);

        let mut batch: Vec<Identity> = Vec::with_capacity(batch_size);
        let mut total = 0usize;

        while let Some(row) = stream.next().await {
            let user = User::try_from(row?)?;
            batch.push(user.identity());
            total += 1;

            if batch.len() >= batch_size {
                self.prime(&batch).await;
                batch.clear();
            }
        }

        if !batch.is_empty() {
            self.prime(&batch).await;
        }

        log::info!("Identity cache warmup complete: {} approved users", total);
        Ok(total)
    }

    async fn prime(&self, identities: &[Identity]) {
        let inserts: Vec<_> = identities
            .iter()
            .map(|identity| self.cache.insert(identity.uid.clone(), identity.clone()))
            .collect();
        futures::future::join_all(inserts).await;
    }
}

#[async_trait]
impl IdentityGate for JwtIdentityGate {
    async fn resolve(&self, credential: &str) -> Result<Identity> {
        let claims = verify_token(credential, &self.secret)
            .map_err(|e| AttendanceError::Unauthenticated(format!("invalid or expired token: {}", e)))?;

        if let Some(identity) = self.cache.get(&claims.sub).await {
            return Ok(identity);
        }

        debug!(uid = %claims.sub, "Identity cache miss");
        let identity = self.load(&claims).await?;
        self.cache.insert(identity.uid.clone(), identity.clone()).await;
        Ok(identity)
    }

    async fn invalidate(&self, uid: &str) {
        self.cache.invalidate(uid).await;
    }
}
