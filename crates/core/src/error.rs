use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: i64, available: i64 },

    #[error("Concurrent update conflict on ledger {client_id}")]
    ConcurrentConflict { client_id: String },

    #[error("Client ledger not found: {0}")]
    ClientNotFound(String),

    #[error("Client ledger already exists: {0}")]
    ClientExists(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl LedgerError {
    /// Whether the caller may retry the whole read-compute-write cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentConflict { .. })
    }

    /// Stable machine-readable code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::ConcurrentConflict { .. } => "CONCURRENT_CONFLICT",
            Self::ClientNotFound(_) => "CLIENT_NOT_FOUND",
            Self::ClientExists(_) => "CLIENT_EXISTS",
            Self::Config(_) => "CONFIGURATION_ERROR",
        }
    }
}
