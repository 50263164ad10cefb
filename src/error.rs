use thiserror::Error;

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON serialization error: {}", err))
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(format!("Database error: {}", err))
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Evidence error: {0}")]
    Evidence(String),

    #[error("Evidence size {size} bytes exceeds maximum {max} bytes")]
    EvidenceTooLarge { size: usize, max: usize },

    #[error("Evidence storage is disabled")]
    EvidenceDisabled,

    #[error("Ledger has not been initialized")]
    NotInitialized,

    #[error("Ledger is closed")]
    Closed,
}

pub type LedgerResult<T> = Result<T, LedgerError>;
