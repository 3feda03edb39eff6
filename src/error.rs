use thiserror::Error;

pub type Result<T> = std::result::Result<T, PaymentError>;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Payment not found: {0}")]
    NotFound(String),
    #[error("Payment with reference '{0}' already exists")]
    AlreadyExists(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Channel error: {0}")]
    ChannelError(String),
    #[error("Decision provider error: {0}")]
    DecisionError(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDbError(#[from] rocksdb::Error),
}

impl PaymentError {
    /// Whether a retry through broker redelivery may succeed.
    ///
    /// Data errors (malformed payloads, missing payments, rejected input) are
    /// permanent and go straight to the dead-letter sink.
    pub fn is_transient(&self) -> bool {
        match self {
            PaymentError::IoError(_)
            | PaymentError::StorageError(_)
            | PaymentError::ChannelError(_)
            | PaymentError::DecisionError(_)
            | PaymentError::Timeout(_) => true,
            #[cfg(feature = "storage-rocksdb")]
            PaymentError::RocksDbError(_) => true,
            PaymentError::CsvError(_)
            | PaymentError::SerializationError(_)
            | PaymentError::ValidationError(_)
            | PaymentError::NotFound(_)
            | PaymentError::AlreadyExists(_) => false,
        }
    }
}
