mod accounts;
mod api;
mod cart_store;
mod config;
mod error;
mod models;
mod repository;
mod schema;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use diesel::{Connection, PgConnection};
use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use shared::auth::TokenService;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cart_store::MemoryCartStore;
use crate::config::{Config, LogFormat, Storage};
use crate::repository::{MemoryStore, PgStore, ShopStore};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn connect(config: &Config) -> Result<Arc<dyn ShopStore>> {
    match config.storage {
        Storage::Memory => {
            info!("using in-memory storage; data is lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
        Storage::Postgres => {
            if config.run_migrations {
                info!("running database migrations");
                let mut conn = PgConnection::establish(&config.database_url)?;
                conn.run_pending_migrations(MIGRATIONS)
                    .map_err(|e| anyhow::anyhow!("migration error: {}", e))?;
                info!("migrations completed");
            }

            let manager =
                AsyncDieselConnectionManager::<AsyncPgConnection>::new(&config.database_url);
            let pool = Pool::builder()
                .max_size(config.db_pool_max_size)
                .build(manager)
                .await?;
            Ok(Arc::new(PgStore::new(pool)))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_tracing(config.log_format);
    config.validate()?;

    let store = connect(&config).await?;
    if let Some(admin) = config.admin_account() {
        accounts::ensure_admin(store.as_ref(), admin).await?;
    }

    let tokens = TokenService::new(config.token_settings())?;
    let state = api::AppState::new(store, Arc::new(MemoryCartStore::new()), tokens);
    let app = api::create_router(state, config.request_timeout());

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!(port = config.port, storage = ?config.storage, "shop service listening");

    axum::serve(listener, app).await?;

    Ok(())
}
