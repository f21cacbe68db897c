use crate::error::DbError;
use configuration::DatabaseConfig;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::env;
use std::time::Duration;

/// Establishes a connection pool to the PostgreSQL database.
///
/// The URL comes from the configuration when set, otherwise from `DATABASE_URL`
/// (a `.env` file is honoured). The pool can be shared across the entire
/// application for concurrent database access.
pub async fn connect(settings: &DatabaseConfig) -> Result<PgPool, DbError> {
    let database_url = match &settings.url {
        Some(url) => url.clone(),
        None => {
            // A missing .env file is fine; the variable may come from the environment.
            dotenvy::dotenv().ok();
            env::var("DATABASE_URL").map_err(|_e| {
                DbError::ConnectionConfigError("database.url or DATABASE_URL must be set.".to_string())
            })?
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    tracing::info!(max_connections = settings.max_connections, "Connected to PostgreSQL");
    Ok(pool)
}

/// Applies the embedded migrations so the schema is up-to-date when the
/// application starts.
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
