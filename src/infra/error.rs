use thiserror::Error;

/// Errors raised at the component boundaries of the crate.
#[derive(Error, Debug)]
pub enum AirlError {
    #[error("Shape mismatch: {0}")]
    Shape(String),

    #[error("{kind} index {index} out of range (limit {limit})")]
    IndexOutOfRange {
        kind: &'static str,
        index: usize,
        limit: usize,
    },

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Tensor data error: {0}")]
    Tensor(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, AirlError>;

impl AirlError {
    pub(crate) fn shape(message: impl Into<String>) -> Self {
        AirlError::Shape(message.into())
    }

    pub(crate) fn out_of_range(kind: &'static str, index: usize, limit: usize) -> Self {
        AirlError::IndexOutOfRange { kind, index, limit }
    }
}

/// Checks `index < limit`, naming the offending table on failure.
pub(crate) fn check_index(kind: &'static str, index: usize, limit: usize) -> Result<()> {
    if index < limit {
        Ok(())
    } else {
        Err(AirlError::out_of_range(kind, index, limit))
    }
}
