use thiserror::Error;

/// Failure to turn an agent payload back into a host value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("type mismatch at {path}: expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: String,
        found: String,
    },

    #[error("unknown opaque reference: {0}")]
    UnknownOpaque(String),

    #[error("malformed payload: {0}")]
    Malformed(String),
}
