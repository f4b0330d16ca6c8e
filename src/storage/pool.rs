use anyhow::Result;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::time::Duration;

use crate::config::DatabaseConfig;

#[derive(Clone)]
pub struct DatabasePool {
    pool: SqlitePool,
}

pub type DatabaseTransaction<'a> = Transaction<'a, Sqlite>;

impl DatabasePool {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&config.url)
            .await?;

        tracing::info!(
            "Database pool created with max_connections={}, min_connections={}",
            config.max_connections,
            config.min_connections
        );

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Database migrations completed successfully");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Database pool closed");
    }

    pub async fn begin_transaction(&self) -> Result<DatabaseTransaction<'_>> {
        let tx = self.pool.begin().await?;
        Ok(tx)
    }
}
