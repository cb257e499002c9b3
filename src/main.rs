#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use memberbridge::{
    configure_routes, utils::logging::LoggingHelper, AuthFlow, BridgeSettings,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load configuration from Settings.toml and environment variables
    // This also loads .env file and initializes the logger
    let settings = BridgeSettings::load()
        .map_err(|e| std::io::Error::other(format!("Failed to load settings: {e}")))?;
    settings
        .validate()
        .map_err(|e| std::io::Error::other(format!("Invalid configuration: {e}")))?;

    let flow = AuthFlow::from_settings(&settings)
        .map_err(|e| std::io::Error::other(format!("Failed to initialize login flow: {e}")))?;

    start_server(flow, settings).await
}

/// Start the HTTP server
///
/// # Errors
///
/// Returns an error if:
/// - Server binding fails
/// - Server fails to start
async fn start_server(flow: AuthFlow, settings: BridgeSettings) -> std::io::Result<()> {
    let bind_address = settings.get_bind_address();
    LoggingHelper::log_startup(
        &bind_address,
        &settings.idp.issuer_host,
        &settings.directory.api_base,
    );
    print_startup_info(&bind_address, &settings);

    let cors_origins = settings.get_cors_origins();
    let flow = web::Data::new(flow);
    let settings = web::Data::new(settings);

    HttpServer::new(move || {
        let cors_origins = cors_origins.clone();
        let cors = Cors::default()
            .allowed_origin_fn(move |origin, _| {
                cors_origins
                    .iter()
                    .any(|allowed| allowed == origin.to_str().unwrap_or(""))
            })
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec!["Content-Type", "Accept"])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .app_data(flow.clone())
            .app_data(settings.clone())
            .wrap(cors)
            .wrap(Logger::default())
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}

fn print_startup_info(bind_address: &str, settings: &BridgeSettings) {
    println!("Starting memberbridge on http://{bind_address}");
    println!();
    println!("Login endpoints:");
    println!("  GET  /auth/login?returnTo=... - Start sign-in with the identity provider");
    println!("  GET  /auth/callback           - Identity provider redirect target");
    println!("  GET|POST /logout              - Clear the application session");
    println!();
    println!("Redirect URI registered with the identity provider:");
    println!("  {}", settings.idp.redirect_uri);
    println!();
    println!("System endpoints:");
    println!("  GET  /api/me - Current application session");
    println!("  GET  /ping   - Health check");
    println!(
        "  Static pages folder: {}",
        settings.application.assets_folder
    );
}
