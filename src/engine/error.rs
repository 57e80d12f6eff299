//! Engine Error Kinds
//!
//! Boundary-visible failures. NumericalDegeneracy is normally recovered
//! locally (sample rejection); the variant exists for the rare case where a
//! whole computation degenerates and has to be surfaced.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("numerical degeneracy: {0}")]
    NumericalDegeneracy(String),

    #[error("scan cancelled")]
    Cancelled,

    #[error("internal engine error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable machine-readable kind for the response envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::NumericalDegeneracy(_) => "numerical_degeneracy",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal",
        }
    }

    /// Process exit code for the CLI adapter.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidInput(_) => 2,
            Self::Cancelled => 3,
            Self::NumericalDegeneracy(_) | Self::Internal(_) => 4,
        }
    }
}
