use std::path::PathBuf;

use thiserror::Error;

use crate::entity::EntityId;

/// Experiment error types
#[derive(Error, Debug)]
pub enum ExperimentError {
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Missing file: {0}")]
    MissingFile(PathBuf),

    #[error("Malformed file {path}, line {line}: {reason}")]
    MalformedFile {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("No entity with ID {0}")]
    UnknownEntity(EntityId),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExperimentError {
    pub fn malformed_file(path: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        ExperimentError::MalformedFile {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExperimentError>;
