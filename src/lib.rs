pub mod application;
pub mod config;
pub mod db;
pub mod domain;
pub mod errors;
pub mod gateway;
pub mod handlers;
pub mod infrastructure;
pub mod schema;

use std::sync::Arc;

use actix_web::{middleware::Logger, web, App, HttpServer};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use application::catalog_service::CatalogService;
use application::order_service::OrderService;
use application::retry::RetryPolicy;
use config::{Settings, StorageBackend};
use domain::ports::{CatalogRepository, OrderStore};
use infrastructure::diesel_store::DieselStore;
use infrastructure::memory::MemoryStore;

pub use db::{create_pool, DbPool};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Error type for everything that can fail before the server is bound.
pub type StartupError = Box<dyn std::error::Error + Send + Sync>;

pub type MigrationError = StartupError;

/// Run any pending Diesel migrations against the pool's database.
pub fn run_migrations(pool: &DbPool) -> Result<(), MigrationError> {
    let mut conn = pool.get()?;
    let applied = conn.run_pending_migrations(MIGRATIONS)?;
    if !applied.is_empty() {
        log::info!("Applied {} database migration(s)", applied.len());
    }
    Ok(())
}

/// Services shared by every request handler. Built once at start-up around
/// a single storage object.
pub struct AppState {
    pub orders: OrderService<dyn OrderStore>,
    pub catalog: CatalogService<dyn CatalogRepository>,
}

impl AppState {
    pub fn new<S>(store: Arc<S>, retry: RetryPolicy) -> Self
    where
        S: OrderStore + CatalogRepository,
    {
        let orders: Arc<dyn OrderStore> = store.clone();
        let catalog: Arc<dyn CatalogRepository> = store;
        Self {
            orders: OrderService::new(orders, retry),
            catalog: CatalogService::new(catalog),
        }
    }
}

/// Opens the configured storage backend, migrating Postgres first.
pub fn build_state(settings: &Settings) -> Result<AppState, StartupError> {
    let state = match settings.storage {
        StorageBackend::Postgres => {
            let database_url = settings
                .database_url
                .as_deref()
                .ok_or("DATABASE_URL must be set")?;
            let pool = create_pool(database_url, settings.pool_size)?;
            run_migrations(&pool)?;
            AppState::new(
                Arc::new(DieselStore::new(pool, settings.unit_timeout)),
                settings.retry.clone(),
            )
        }
        StorageBackend::Memory => {
            log::warn!("Using in-memory storage; data is lost on restart");
            AppState::new(
                Arc::new(MemoryStore::new(settings.unit_timeout)),
                settings.retry.clone(),
            )
        }
    };

    if settings.seed_sample_data {
        if let Err(e) = state.catalog.seed_sample_data() {
            log::error!("Failed to seed sample data: {}", e);
        }
    }
    Ok(state)
}

/// Build and return an actix-web `Server` bound to `host:port`.
///
/// The caller is responsible for `.await`-ing (or `tokio::spawn`-ing) the
/// returned server.
pub fn build_server(
    state: AppState,
    host: &str,
    port: u16,
) -> std::io::Result<actix_web::dev::Server> {
    let state = web::Data::new(state);
    Ok(HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .configure(handlers::configure)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", handlers::ApiDoc::openapi()),
            )
    })
    .bind((host.to_string(), port))?
    .run())
}
