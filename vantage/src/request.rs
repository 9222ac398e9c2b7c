//! Generation requests

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which pipeline flow a request drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Create,
    Fix,
    Update,
}

impl FlowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowKind::Create => "create",
            FlowKind::Fix => "fix",
            FlowKind::Update => "update",
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user action handed to the pipeline. Fields are private so a request
/// cannot change after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    flow: FlowKind,
    description: String,
    prior_source: Option<String>,
    prior_errors: Vec<String>,
}

impl GenerationRequest {
    pub fn create(description: impl Into<String>) -> Self {
        Self {
            flow: FlowKind::Create,
            description: description.into(),
            prior_source: None,
            prior_errors: Vec::new(),
        }
    }

    /// Repair an existing component given the errors observed when running it.
    pub fn fix(
        description: impl Into<String>,
        source: impl Into<String>,
        errors: Vec<String>,
    ) -> Self {
        Self {
            flow: FlowKind::Fix,
            description: description.into(),
            prior_source: Some(source.into()),
            prior_errors: errors,
        }
    }

    /// Apply a change request to an existing component.
    pub fn update(source: impl Into<String>, change_request: impl Into<String>) -> Self {
        Self {
            flow: FlowKind::Update,
            description: change_request.into(),
            prior_source: Some(source.into()),
            prior_errors: Vec::new(),
        }
    }

    pub fn flow(&self) -> FlowKind {
        self.flow
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn prior_source(&self) -> Option<&str> {
        self.prior_source.as_deref()
    }

    pub fn prior_errors(&self) -> &[String] {
        &self.prior_errors
    }
}
