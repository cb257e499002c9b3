// HTTP request handlers for the login bridge
pub mod auth;
pub mod bridge_page;
pub mod session;
pub mod static_files;


use actix_web::web;

// Re-export the main handler functions
pub use auth::{callback, login, logout};
pub use session::current_user;
pub use static_files::{dashboard_page, health, index_page};

/// Register every route of the bridge
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/auth/login", web::get().to(login))
        .route("/auth/callback", web::get().to(callback))
        .route("/api/me", web::get().to(current_user))
        .service(
            web::resource("/logout")
                .route(web::get().to(logout))
                .route(web::post().to(logout)),
        )
        .route("/ping", web::get().to(health))
        .route("/", web::get().to(index_page))
        .route("/dashboard", web::get().to(dashboard_page));
}
