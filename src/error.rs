use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("transaction rolled back: {0}")]
    Rollback(String),
    #[error("invalid vertex id: {0}")]
    InvalidVertex(u64),
    #[error("invalid transaction state: {0}")]
    InvalidState(&'static str),
    #[error("capacity exceeded: {0}")]
    Capacity(&'static str),
    #[error("corruption detected: {0}")]
    Corruption(&'static str),
}

impl GraphError {
    /// Whether the error signals a write-write conflict that the caller may
    /// retry after aborting.
    pub fn is_rollback(&self) -> bool {
        matches!(self, GraphError::Rollback(_))
    }
}
