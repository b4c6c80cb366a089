use crate::{
    api::{assignments, attendance, classes, me, reports, subjects, users},
    auth::{handlers, middleware::auth_middleware},
    config::Config,
};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use std::sync::Arc;

/// Builds a per-IP limiter allowing `requests_per_min` with an equal burst.
fn build_limiter(requests_per_min: u32) -> Governor<PeerIpKeyExtractor, NoOpMiddleware> {
    let requests_per_min = requests_per_min.max(1);
    let per_ms = (60_000 / requests_per_min as u64).max(1);
    let cfg = GovernorConfigBuilder::default()
        .milliseconds_per_request(per_ms)
        .burst_size(requests_per_min)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        // both values are non-zero
        .unwrap_or_default();
    Governor::new(&cfg)
}

pub fn configure(cfg: &mut web::ServiceConfig, config: Config) {
    let login_limiter = Arc::new(build_limiter(config.rate_login_per_min));
    let refresh_limiter = Arc::new(build_limiter(config.rate_refresh_per_min));
    let protected_limiter = Arc::new(build_limiter(config.rate_protected_per_min));

    // Public routes
    cfg.service(
        web::scope("/auth")
            .service(
                web::resource("/login")
                    .wrap(login_limiter.clone())
                    .route(web::post().to(handlers::login)),
            )
            .service(
                web::resource("/refresh")
                    .wrap(refresh_limiter.clone())
                    .route(web::post().to(handlers::refresh_token)),
            )
            .service(
                web::resource("/logout")
                    .wrap(login_limiter.clone())
                    .route(web::post().to(handlers::logout)),
            ),
    );

    // Protected routes
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware)) // authentication
            .wrap(protected_limiter) // rate limiting
            .service(
                web::scope("/users")
                    .service(
                        web::resource("")
                            .route(web::post().to(users::create_user))
                            .route(web::get().to(users::list_users)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(users::get_user))
                            .route(web::put().to(users::update_user))
                            .route(web::delete().to(users::delete_user)),
                    ),
            )
            .service(
                web::scope("/classes")
                    .service(
                        web::resource("")
                            .route(web::post().to(classes::create_class))
                            .route(web::get().to(classes::list_classes)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(classes::get_class))
                            .route(web::put().to(classes::update_class))
                            .route(web::delete().to(classes::delete_class)),
                    )
                    // /classes/{id}/students
                    .service(
                        web::resource("/{id}/students")
                            .route(web::get().to(classes::list_class_students)),
                    ),
            )
            .service(
                web::scope("/subjects")
                    .service(
                        web::resource("")
                            .route(web::post().to(subjects::create_subject))
                            .route(web::get().to(subjects::list_subjects)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(subjects::get_subject))
                            .route(web::put().to(subjects::update_subject))
                            .route(web::delete().to(subjects::delete_subject)),
                    ),
            )
            .service(
                web::scope("/assignments")
                    .service(
                        web::resource("")
                            .route(web::post().to(assignments::create_assignment))
                            .route(web::get().to(assignments::list_assignments)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::delete().to(assignments::delete_assignment)),
                    ),
            )
            .service(
                web::scope("/attendance")
                    .service(
                        web::resource("")
                            .route(web::post().to(attendance::mark_attendance))
                            .route(web::get().to(attendance::list_attendance)),
                    )
                    // registered before /{id} so it is not captured as an id
                    .service(
                        web::resource("/bulk-update")
                            .route(web::post().to(attendance::bulk_update_attendance)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::put().to(attendance::update_attendance)),
                    ),
            )
            .service(
                web::scope("/reports")
                    .route("/attendance", web::get().to(reports::attendance_report))
                    .route("/low-attendance", web::get().to(reports::low_attendance))
                    .route("/classes", web::get().to(reports::class_report))
                    .route("/overview", web::get().to(reports::overview))
                    .route("/students/{id}", web::get().to(reports::student_report)),
            )
            .service(
                web::scope("/me")
                    .service(
                        web::resource("")
                            .route(web::get().to(me::get_profile))
                            .route(web::put().to(me::update_profile)),
                    )
                    .route("/password", web::put().to(me::change_password))
                    .route("/attendance", web::get().to(me::my_attendance))
                    .route("/assignments", web::get().to(me::my_assignments)),
            ),
    );
}

// LOGIN
//  ├─ access_token (ACCESS_TOKEN_TTL)
//  └─ refresh_token (REFRESH_TOKEN_TTL, stored + rotated)

// API REQUEST
//  └─ Authorization: Bearer access_token

// ACCESS EXPIRED
//  └─ POST /auth/refresh with refresh_token
//       └─ returns a new pair, old refresh token revoked

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limiter_builds_for_extreme_rates() {
        // zero is clamped to one request per minute
        let _ = build_limiter(0);
        let _ = build_limiter(60);
        // faster than one request per millisecond
        let _ = build_limiter(1_000_000);
    }
}
