use thiserror::Error;

/// Errors from the cell reference codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefError {
    #[error("invalid coordinate ({row}, {col})")]
    InvalidCoordinate { row: i64, col: i64 },

    #[error("malformed cell reference: {0}")]
    MalformedReference(String),

    #[error("malformed range: {0}")]
    MalformedRange(String),

    #[error("malformed cell id: {0}")]
    MalformedCellId(String),
}
