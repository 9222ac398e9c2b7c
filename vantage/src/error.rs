//! Error types for the Vantage runtime.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a failed attempt, shared by attempt records and the
/// exhaustion error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    Transport,
    Timeout,
    MalformedResponse,
    Validation,
    Runtime,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Configuration => "configuration",
            FailureKind::Transport => "transport",
            FailureKind::Timeout => "timeout",
            FailureKind::MalformedResponse => "malformed_response",
            FailureKind::Validation => "validation",
            FailureKind::Runtime => "runtime",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationFailure {
    #[error("No response within {limit_ms} ms")]
    Timeout { limit_ms: u64 },
    #[error("Transport failure: {0}")]
    Transport(String),
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl GenerationFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            GenerationFailure::Timeout { .. } => FailureKind::Timeout,
            GenerationFailure::Transport(_) => FailureKind::Transport,
            GenerationFailure::MalformedResponse(_) => FailureKind::MalformedResponse,
        }
    }
}

/// Error type for the Vantage runtime.
#[derive(Debug, Error)]
pub enum VantageError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("{stage} timed out after {limit_ms} ms")]
    Timeout { stage: String, limit_ms: u64 },
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Runtime failure: {0}")]
    Runtime(String),
    #[error("Repair exhausted after {attempts} attempt(s); last failure ({kind}): {message}")]
    RepairExhausted {
        kind: FailureKind,
        message: String,
        attempts: u32,
    },
    #[error("Sandbox error: {0}")]
    Sandbox(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl VantageError {
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            VantageError::Configuration(_) => Some(FailureKind::Configuration),
            VantageError::Transport(_) => Some(FailureKind::Transport),
            VantageError::Timeout { .. } => Some(FailureKind::Timeout),
            VantageError::MalformedResponse(_) => Some(FailureKind::MalformedResponse),
            VantageError::Validation(_) => Some(FailureKind::Validation),
            VantageError::Runtime(_) => Some(FailureKind::Runtime),
            VantageError::RepairExhausted { kind, .. } => Some(*kind),
            VantageError::Sandbox(_) | VantageError::Io(_) | VantageError::Serialization(_) => {
                None
            }
        }
    }
}

impl From<GenerationFailure> for VantageError {
    fn from(e: GenerationFailure) -> Self {
        match e {
            GenerationFailure::Timeout { limit_ms } => VantageError::Timeout {
                stage: "generation".to_string(),
                limit_ms,
            },
            GenerationFailure::Transport(msg) => VantageError::Transport(msg),
            GenerationFailure::MalformedResponse(msg) => VantageError::MalformedResponse(msg),
        }
    }
}

impl From<std::io::Error> for VantageError {
    fn from(e: std::io::Error) -> Self {
        VantageError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for VantageError {
    fn from(e: serde_json::Error) -> Self {
        VantageError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for VantageError {
    fn from(e: toml::de::Error) -> Self {
        VantageError::Configuration(format!("Failed to parse config: {}", e))
    }
}

impl From<vantage_source::StageError> for VantageError {
    fn from(e: vantage_source::StageError) -> Self {
        VantageError::Validation(e.to_string())
    }
}

pub type VantageResult<T> = Result<T, VantageError>;
