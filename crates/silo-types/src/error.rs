use thiserror::Error;

#[derive(Error, Debug)]
pub enum TypesError {
    #[error("Invalid hex encoding: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("Invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Signature error: {0}")]
    Signature(String),

    #[error("Key error: {0}")]
    Key(String),

    #[error("Invalid contract: {0}")]
    Contract(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TypesError>;
