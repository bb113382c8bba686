// src/db.rs
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use thiserror::Error;
use tracing::info;

use crate::config::{Config, StoreBackend};
use crate::store::memory::MemoryStore;
use crate::store::postgres::PostgresStore;
use crate::store::Store;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("DATABASE_URL must be set for the postgres backend")]
    MissingUrl,

    #[error("Failed to connect to the database: {0}")]
    Connect(#[from] sqlx::Error),

    #[error("Failed to apply migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

pub async fn create_pool(config: &Config) -> Result<Pool<Postgres>, DbError> {
    let database_url = config.database_url.as_deref().ok_or(DbError::MissingUrl)?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.lock_timeout)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

pub async fn open_store(config: &Config) -> Result<Arc<dyn Store>, DbError> {
    match config.store_backend {
        StoreBackend::Postgres => {
            let pool = create_pool(config).await?;
            info!(max_connections = config.max_connections, "Connected to Postgres");
            Ok(Arc::new(PostgresStore::new(pool, config.lock_timeout)))
        }
        StoreBackend::Memory => {
            info!("Using the in-memory store, data is lost on restart");
            Ok(Arc::new(MemoryStore::new(config.lock_timeout)))
        }
    }
}
