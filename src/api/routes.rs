use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{get, patch, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};

use crate::api::{handlers, upload};
use crate::config::AppConfig;
use crate::store::PortfolioStore;

/// Routes mounted under `/api`.
pub fn create_router<S: PortfolioStore + 'static>() -> Router<handlers::AppState<S>> {
    Router::new()
        // Portfolios
        .route(
            "/portfolios",
            get(handlers::list_portfolios::<S>).post(handlers::create_portfolio::<S>),
        )
        .route(
            "/portfolios/:portfolio_id",
            get(handlers::get_portfolio::<S>)
                .put(handlers::update_portfolio::<S>)
                .delete(handlers::delete_portfolio::<S>),
        )
        // Items
        .route(
            "/portfolios/:portfolio_id/items",
            post(handlers::create_item::<S>),
        )
        .route(
            "/portfolios/:portfolio_id/items/:item_id",
            patch(handlers::update_item::<S>).delete(handlers::delete_item::<S>),
        )
        // Sections
        .route(
            "/portfolios/:portfolio_id/sections",
            get(handlers::list_sections::<S>).post(handlers::create_section::<S>),
        )
        .route(
            "/portfolios/:portfolio_id/sections/:section_id",
            put(handlers::update_section::<S>).delete(handlers::delete_section::<S>),
        )
        // Media
        .route(
            "/upload",
            post(upload::upload_media::<S>).layer(DefaultBodyLimit::max(upload::UPLOAD_BODY_LIMIT)),
        )
}

/// The full application: banner and health, the API, uploaded media served
/// statically, CORS for the configured front-end origins.
pub fn create_app<S: PortfolioStore + 'static>(
    state: handlers::AppState<S>,
    config: &AppConfig,
) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .nest("/api", create_router::<S>())
        .nest_service(
            &config.media.public_prefix,
            ServeDir::new(&config.media.upload_dir),
        )
        .layer(cors_layer(&config.server.allowed_origins))
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
}
