//! Usage Ledger Error Types

/// Error types for ledger operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database driver error
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Referenced row does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stored data could not be interpreted
    #[error("Internal: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
