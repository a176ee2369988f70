//! Error types for the worker
//!
//! [`WorkerError::is_recoverable`] splits failures into transient ones, which the scheduler
//! retries after a backoff, and fatal ones, which are surfaced to the process boundary.

use thiserror::Error;
use uuid::Uuid;

/// Failure raised by a [`crate::Classifier`] implementation.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Classification failed: {0}")]
    Failed(String),
}

/// Failure of the notification subscription.
#[derive(Debug, Error)]
pub enum ListenError {
    /// The listener connection was lost; the subscription has to be recreated.
    #[error("Notification connection lost: {0}")]
    Disconnected(String),

    #[error("Failed to subscribe to channel '{channel}': {reason}")]
    Subscribe { channel: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "sqlx")]
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Classifier error for item {id}: {source}")]
    Classifier {
        id: Uuid,
        #[source]
        source: ClassifierError,
    },

    #[error("Listener error: {0}")]
    Listener(#[from] ListenError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// SQLSTATE codes that point at a broken deployment rather than a passing condition.
#[cfg(feature = "sqlx")]
const FATAL_SQLSTATES: &[&str] = &[
    "28000", // invalid_authorization_specification
    "28P01", // invalid_password
    "3D000", // invalid_catalog_name
    "42501", // insufficient_privilege
    "42P01", // undefined_table
    "42703", // undefined_column
    "42883", // undefined_function
];

impl WorkerError {
    /// Whether retrying the same operation later can succeed.
    ///
    /// Classifier and listener failures are always recoverable: the batch is rolled back and
    /// the items stay pending. Schema, authentication and configuration problems are not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            #[cfg(feature = "sqlx")]
            WorkerError::Database(e) => is_recoverable_sqlx(e),
            #[cfg(feature = "sqlx")]
            WorkerError::Migration(_) => false,
            WorkerError::Classifier { .. } => true,
            WorkerError::Listener(_) => true,
            WorkerError::Config(_) => false,
        }
    }
}

#[cfg(feature = "sqlx")]
fn is_recoverable_sqlx(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => match db.code() {
            Some(code) => !FATAL_SQLSTATES.iter().any(|fatal| code == *fatal),
            None => true,
        },
        sqlx::Error::Configuration(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_) => false,
        _ => true,
    }
}
