use thiserror::Error;

/// Coarse classification of [`OblivError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before any cryptographic work began.
    Validation,
    /// The key (or its recorded length) is not in the key store.
    NotFound,
    /// A supplied label or record does not belong to the expected epoch.
    Integrity,
    /// A primitive failed.
    Crypto,
    /// Checkpoint load/save failed.
    Persistence,
}

#[derive(Error, Debug)]
pub enum OblivError {
    #[error("Value is {len} bytes, exceeds fixed width of {max} bytes")]
    ValueTooLong { len: usize, max: usize },

    #[error("Empty values cannot be stored")]
    EmptyValue,

    #[error("Label table is {actual} bytes, expected {expected}")]
    TableLength { actual: usize, expected: usize },

    #[error("Entry for key {0} carries no second channel")]
    MissingChannel(String),

    #[error("Selector must be 0 or 1, got {0}")]
    InvalidSelector(u8),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("No value length recorded for key: {0}")]
    LengthUnknown(String),

    #[error("Label table for key {0} does not match the current epoch")]
    Integrity(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid checkpoint: {0}")]
    Checkpoint(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl OblivError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OblivError::ValueTooLong { .. }
            | OblivError::EmptyValue
            | OblivError::TableLength { .. }
            | OblivError::MissingChannel(_)
            | OblivError::InvalidSelector(_)
            | OblivError::Config(_) => ErrorKind::Validation,
            OblivError::KeyNotFound(_) | OblivError::LengthUnknown(_) => ErrorKind::NotFound,
            OblivError::Integrity(_) => ErrorKind::Integrity,
            OblivError::Encryption(_)
            | OblivError::Decryption(_)
            | OblivError::KeyDerivation(_) => ErrorKind::Crypto,
            OblivError::Checkpoint(_) | OblivError::Io(_) | OblivError::Serialization(_) => {
                ErrorKind::Persistence
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, OblivError>;
