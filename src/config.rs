use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

/// Which persistence backend the stores run on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    MySql,
    Memory,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub server_addr: String,
    pub api_prefix: String,
    pub log_dir: String,

    /// First login with this email becomes an approved admin.
    pub master_admin_email: Option<String>,

    // Directory
    pub page_size: usize,

    // Attendance engine
    pub mark_retry_attempts: u32,
    pub mark_retry_backoff: Duration,

    // Identity gate
    pub identity_cache_ttl: Duration,

    // Rate limiting
    pub rate_write_per_min: u32,
    pub rate_read_per_min: u32,
}

fn var_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", key, raw)),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let store = match env::var("STORE").as_deref() {
            Ok("memory") => StoreBackend::Memory,
            Ok("mysql") | Err(_) => StoreBackend::MySql,
            Ok(other) => anyhow::bail!("STORE must be 'mysql' or 'memory', got '{}'", other),
        };

        let database_url = match store {
            StoreBackend::MySql => Some(env::var("DATABASE_URL").context("DATABASE_URL must be set")?),
            StoreBackend::Memory => env::var("DATABASE_URL").ok(),
        };

        let page_size: usize = var_or("PAGE_SIZE", 20)?;
        if page_size == 0 {
            anyhow::bail!("PAGE_SIZE must be at least 1");
        }

        Ok(Self {
            store,
            database_url,
            server_addr: env::var("SERVER_ADDR").context("SERVER_ADDR must be set")?,
            jwt_secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            api_prefix: env::var("API_PREFIX").unwrap_or_else(|_| "/api".to_string()),
            log_dir: env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string()),
            master_admin_email: env::var("MASTER_ADMIN_EMAIL").ok(),

            page_size,

            mark_retry_attempts: var_or("MARK_RETRY_ATTEMPTS", 3u32)?.max(1),
            mark_retry_backoff: Duration::from_millis(var_or("MARK_RETRY_BACKOFF_MS", 50u64)?),

            identity_cache_ttl: Duration::from_secs(var_or("IDENTITY_CACHE_TTL_SECS", 30u64)?),

            rate_write_per_min: var_or("RATE_WRITE_PER_MIN", 120)?,
            rate_read_per_min: var_or("RATE_READ_PER_MIN", 1000)?,
        })
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            store: StoreBackend::Memory,
            database_url: None,
            jwt_secret: "test-secret".to_string(),
            server_addr: "127.0.0.1:0".to_string(),
            api_prefix: "/api".to_string(),
            log_dir: "logs".to_string(),
            master_admin_email: Some("chief@event.org".to_string()),
            page_size: 20,
            mark_retry_attempts: 3,
            mark_retry_backoff: Duration::from_millis(1),
            identity_cache_ttl: Duration::from_secs(30),
            rate_write_per_min: 10_000,
            rate_read_per_min: 10_000,
        }
    }
}
