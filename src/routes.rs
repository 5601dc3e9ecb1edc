use crate::{
    api::{attendance, notifications, settings, teams, users},
    auth::middleware::auth_middleware,
    config::Config,
};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use anyhow::{Context, Result};
use std::sync::Arc;

type Limiter = Arc<Governor<PeerIpKeyExtractor, NoOpMiddleware>>;

/// Per-route rate limiters, built once and shared by every worker.
#[derive(Clone)]
pub struct Limiters {
    read: Limiter,
    write: Limiter,
}

impl Limiters {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            read: build_limiter(config.rate_read_per_min).context("invalid RATE_READ_PER_MIN")?,
            write: build_limiter(config.rate_write_per_min).context("invalid RATE_WRITE_PER_MIN")?,
        })
    }
}

fn build_limiter(requests_per_min: u32) -> Option<Limiter> {
    let requests_per_min = requests_per_min.max(1);
    let per_ms = (60_000 / requests_per_min as u64).max(1);
    let cfg = GovernorConfigBuilder::default()
        .milliseconds_per_request(per_ms)
        .burst_size(requests_per_min)
        .key_extractor(PeerIpKeyExtractor)
        .finish()?;
    Some(Arc::new(Governor::new(&cfg)))
}

pub fn configure(cfg: &mut web::ServiceConfig, config: &Config, limiters: &Limiters) {
    // registered ahead of the authenticated scope, which would otherwise claim the prefix
    cfg.service(
        web::scope(&format!("{}/public", config.api_prefix))
            .wrap(limiters.read.clone())
            .service(web::resource("/teams/{id}").route(web::get().to(teams::public_team))),
    );
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware))
            .wrap(limiters.read.clone())
            .service(web::resource("/me").route(web::get().to(users::me)))
            .service(
                web::scope("/teams")
                    // /teams
                    .service(
                        web::resource("")
                            .route(web::get().to(teams::list_teams))
                            .route(web::post().to(teams::create_team)),
                    )
                    .service(web::resource("/all").route(web::get().to(teams::all_teams)))
                    .service(web::resource("/stats").route(web::get().to(teams::stats)))
                    .service(web::resource("/stream").route(web::get().to(teams::stream_teams)))
                    // /teams/{id}
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(teams::get_team))
                            .route(web::patch().to(teams::update_team))
                            .route(web::delete().to(teams::delete_team)),
                    )
                    .service(web::resource("/{id}/qr").route(web::post().to(teams::regenerate_qr)))
                    // attendance writes
                    .service(
                        web::resource("/{id}/attendance")
                            .wrap(limiters.write.clone())
                            .route(web::post().to(attendance::mark_attendance)),
                    )
                    .service(
                        web::resource("/{id}/attendance/count")
                            .route(web::post().to(attendance::mark_count)),
                    )
                    .service(
                        web::resource("/{id}/unlock")
                            .wrap(limiters.write.clone())
                            .route(web::post().to(attendance::unlock)),
                    ),
            )
            .service(
                web::resource("/attendance/reset")
                    .wrap(limiters.write.clone())
                    .route(web::post().to(attendance::reset)),
            )
            .service(
                web::scope("/settings")
                    .service(
                        web::resource("")
                            .route(web::get().to(settings::get_settings))
                            .route(web::patch().to(settings::update_settings)),
                    )
                    .service(web::resource("/stream").route(web::get().to(settings::stream_settings))),
            )
            .service(
                web::scope("/notifications")
                    .service(
                        web::resource("")
                            .route(web::get().to(notifications::list_notifications))
                            .route(web::post().to(notifications::post_notification)),
                    )
                    .service(
                        web::resource("/stream").route(web::get().to(notifications::stream_notifications)),
                    ),
            )
            .service(
                web::scope("/users")
                    .service(web::resource("").route(web::get().to(users::list_users)))
                    .service(web::resource("/{uid}/approval").route(web::put().to(users::set_approval)))
                    .service(web::resource("/{uid}/role").route(web::put().to(users::set_role))),
            ),
    );
}
