//! Embedded schema migrations.
//!
//! The SQL files under `migrations/` are compiled into the binary and applied
//! in timestamp order. `sqlx` records applied versions and takes an advisory
//! lock, so concurrent starters apply each migration once.

use crate::error::{EventLoopError, Result};
use sqlx::migrate::Migrator;
use sqlx::PgPool;
use tracing::info;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| EventLoopError::Database(format!("migration failed: {e}")))?;
    info!(
        migrations = MIGRATOR.iter().count(),
        "Event loop schema up to date"
    );
    Ok(())
}
