use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Failed to load environment variables for database connection: {0}")]
    ConnectionConfigError(String),

    #[error("Database operation failed: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("An error occurred during JSON serialization/deserialization: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Stored value could not be decoded: {0}")]
    DecodeError(String),

    #[error("A record with key {0} already exists.")]
    Duplicate(String),

    #[error("The requested data was not found in the database.")]
    NotFound,

    #[error("The store is unavailable: {0}")]
    Unavailable(String),
}
