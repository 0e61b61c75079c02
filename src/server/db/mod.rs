//! Database access layer using sqlx with PostgreSQL

pub mod organizations;
pub mod users;
pub mod agents;
pub mod calls;
pub mod phone_numbers;
pub mod integrations;
pub mod activities;
pub mod webhooks;

use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

/// Initialize the database connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
