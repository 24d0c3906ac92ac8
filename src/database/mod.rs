//! # Database
//!
//! PostgreSQL pool construction and embedded schema migrations for
//! [`PostgresStore`](crate::store::PostgresStore).

pub mod connection;
pub mod migrations;

pub use connection::{create_pool, DatabaseConnection};
pub use migrations::run_migrations;
