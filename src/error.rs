//! Error types for the ratio engine

use thiserror::Error;

/// Main error type for ratio derivation and regression
#[derive(Error, Debug)]
pub enum RatioError {
    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    #[error("Column not found: {column} (table: {table})")]
    MissingColumn { table: String, column: String },

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
}

impl RatioError {
    /// Configuration problems are the only errors that stop a run before it starts
    pub fn is_fatal(&self) -> bool {
        matches!(self, RatioError::ConfigError(_) | RatioError::TomlError(_))
    }
}

/// Result type alias for ratio engine operations
pub type Result<T> = std::result::Result<T, RatioError>;
