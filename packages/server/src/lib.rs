#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for the protest map.
//!
//! Holds one live map view (both record collections kept in sync with the
//! store) and serves it over a REST API: marker layers as `GeoJSON`, the
//! raw collections, report and panic alert submission, nearest safe zone
//! with optional routing, and a server-sent events stream of live
//! inserts.
//!
//! Configuration is read from the environment. Without `STORE_URL` and
//! `STORE_API_KEY` the server runs against an in-memory store.

mod handlers;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use protest_map_geolocation::http::HttpSource;
use protest_map_geolocation::{GeolocationProvider, PositionOptions};
use protest_map_map::MapViewState;
use protest_map_routing::RouteProvider;
use protest_map_routing::osrm::{OsrmClient, OsrmConfig};
use protest_map_store::RecordStore;
use protest_map_store::memory::MemoryStore;
use protest_map_store::rest::{RestStore, RestStoreConfig};
use protest_map_submission::PanicConfig;
use protest_map_sync::ReconnectPolicy;

/// Shared application state.
pub struct AppState {
    /// Record store.
    pub store: Arc<dyn RecordStore>,
    /// The live map view.
    pub view: MapViewState,
    /// Position used when a request carries none.
    pub geolocation: GeolocationProvider,
    /// Routing engine, if one could be set up.
    pub router: Option<Arc<dyn RouteProvider>>,
    /// Panic dispatch settings.
    pub panic: PanicConfig,
}

impl AppState {
    /// Opens the map view over `store`.
    pub async fn new(
        store: Arc<dyn RecordStore>,
        geolocation: GeolocationProvider,
        router: Option<Arc<dyn RouteProvider>>,
        panic: PanicConfig,
    ) -> Self {
        let view = MapViewState::open(store.clone(), &geolocation, ReconnectPolicy::default()).await;
        Self {
            store,
            view,
            geolocation,
            router,
            panic,
        }
    }

    /// Builds the state from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the hosted store is configured but its client
    /// cannot be built.
    pub async fn from_env() -> std::io::Result<Self> {
        let store: Arc<dyn RecordStore> = if let Some(config) = RestStoreConfig::from_env() {
            log::info!("Using hosted store at {}", config.base_url);
            Arc::new(RestStore::new(config).map_err(std::io::Error::other)?)
        } else {
            log::warn!("STORE_URL/STORE_API_KEY not set, using in-memory store");
            Arc::new(MemoryStore::new())
        };

        let geolocation = match HttpSource::from_env(reqwest::Client::new()) {
            Some(source) => GeolocationProvider::new(Arc::new(source), PositionOptions::default()),
            None => GeolocationProvider::unsupported(),
        };

        let router: Option<Arc<dyn RouteProvider>> = match OsrmClient::new(OsrmConfig::from_env()) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                log::error!("Routing disabled: {e}");
                None
            }
        };

        Ok(Self::new(store, geolocation, router, PanicConfig::from_env()).await)
    }
}

/// Registers the API routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/danger-types", web::get().to(handlers::danger_types))
            .route("/safe-zones", web::get().to(handlers::safe_zones))
            .route("/map", web::get().to(handlers::map))
            .route("/reports", web::get().to(handlers::reports))
            .route("/reports", web::post().to(handlers::submit_report))
            .route("/alerts", web::get().to(handlers::alerts))
            .route("/alerts", web::post().to(handlers::submit_alert))
            .route("/nearest-safe-zone", web::get().to(handlers::nearest_safe_zone))
            .route("/events", web::get().to(handlers::events)),
    );
}

/// Starts the protest map API server.
///
/// This is a regular async function; the caller is responsible for
/// providing the async runtime (e.g. via `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if the state cannot be built, or
/// the HTTP server fails to bind or encounters a runtime error.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let state = web::Data::new(AppState::from_env().await?);

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((bind_addr, port))?
    .run()
    .await
}
