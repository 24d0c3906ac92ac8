use crate::config::DatabaseConfig;
use crate::error::{EventLoopError, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, error};

/// Build a pool sized and timed per `config`
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    debug!(
        url = %config.redacted_url(),
        max_connections = config.max_connections,
        "Connecting to PostgreSQL"
    );

    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout())
        .connect(&config.url)
        .await
        .map_err(|e| {
            error!(url = %config.redacted_url(), error = %e, "Database connection failed");
            EventLoopError::from(e)
        })
}

pub struct DatabaseConnection {
    pool: PgPool,
}

impl DatabaseConnection {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        Ok(Self {
            pool: create_pool(config).await?,
        })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS health")
            .fetch_one(&self.pool)
            .await?;

        let health: i32 = row.try_get("health")?;
        Ok(health == 1)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
