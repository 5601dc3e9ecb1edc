use actix_web::middleware::{Logger, NormalizePath};
use actix_web::{App, HttpServer, Responder, get};
use anyhow::Context;

mod api;
mod auth;
mod config;
mod db;
mod docs;
mod error;
mod model;
mod models;
mod routes;
mod services;
mod state;
mod store;
mod utils;

use config::{Config, StoreBackend};
use db::init_db;
use routes::Limiters;
use state::{AppState, Stores};

use crate::docs::ApiDoc;
use tracing::{info, warn};
use tracing_appender::rolling;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

const IDENTITY_WARMUP_BATCH: usize = 250;

#[get("/health")]
async fn health() -> impl Responder {
    "ok"
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Rolling daily log
    let file_appender = rolling::daily(&config.log_dir, "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .pretty()
        .init();

    info!("Server starting...");

    let (stores, pool) = match config.store {
        StoreBackend::MySql => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set")?;
            let pool = init_db(url).await.context("failed to prepare the MySQL schema")?;
            (Stores::mysql(pool.clone()), Some(pool))
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store, nothing survives a restart");
            (Stores::memory(), None)
        }
    };

    let state = AppState::build(&config, stores)
        .await
        .context("failed to initialise services")?;

    if let Some(pool) = pool {
        let gate = state.gate.clone();
        actix_web::rt::spawn(async move {
            if let Err(e) = gate.warm_up(&pool, IDENTITY_WARMUP_BATCH).await {
                warn!(error = %e, "Identity cache warmup failed");
            }
        });
    }

    let limiters = Limiters::from_config(&config)?;
    let server_addr = config.server_addr.clone();

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}") // wildcard so JS/CSS assets resolve
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .configure(|cfg| state.install(cfg))
            .service(health)
            .configure(|cfg| routes::configure(cfg, &config, &limiters))
    })
    .bind(&server_addr)
    .with_context(|| format!("failed to bind {}", server_addr))?
    .run()
    .await?;

    Ok(())
}
