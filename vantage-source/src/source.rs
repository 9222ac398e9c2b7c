//! Candidate source text and its pipeline stages.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Pipeline stage of a candidate. Stages only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Raw,
    Repaired,
    Validated,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Raw => "raw",
            Stage::Repaired => "repaired",
            Stage::Validated => "validated",
        }
    }

    fn next(&self) -> Option<Stage> {
        match self {
            Stage::Raw => Some(Stage::Repaired),
            Stage::Repaired => Some(Stage::Validated),
            Stage::Validated => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    #[error("invalid stage transition: {from} -> {to}")]
    InvalidTransition { from: Stage, to: Stage },
}

/// Immutable component text tagged with the stage that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSource {
    text: String,
    stage: Stage,
}

impl CandidateSource {
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            stage: Stage::Raw,
        }
    }

    pub(crate) fn at_stage(text: impl Into<String>, stage: Stage) -> Self {
        Self {
            text: text.into(),
            stage,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn into_text(self) -> String {
        self.text
    }

    /// Produce the next-stage value. `self` is left untouched.
    pub fn advance(&self, to: Stage, text: impl Into<String>) -> Result<CandidateSource, StageError> {
        if self.stage.next() != Some(to) {
            return Err(StageError::InvalidTransition {
                from: self.stage,
                to,
            });
        }
        Ok(CandidateSource {
            text: text.into(),
            stage: to,
        })
    }

    /// Mark a repaired candidate as validated without changing its text.
    pub fn promote(&self) -> Result<CandidateSource, StageError> {
        self.advance(Stage::Validated, self.text.clone())
    }
}

impl AsRef<str> for CandidateSource {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        let raw = CandidateSource::raw("function App() {}");
        let repaired = raw.advance(Stage::Repaired, "function App() { }").unwrap();
        assert_eq!(raw.stage(), Stage::Raw);
        assert_eq!(raw.text(), "function App() {}");
        let validated = repaired.promote().unwrap();
        assert_eq!(validated.stage(), Stage::Validated);
        assert_eq!(validated.text(), repaired.text());
    }

    #[test]
    fn test_rejects_skips_and_backwards() {
        let raw = CandidateSource::raw("x");
        assert_eq!(
            raw.advance(Stage::Validated, "x"),
            Err(StageError::InvalidTransition {
                from: Stage::Raw,
                to: Stage::Validated
            })
        );
        let validated = raw
            .advance(Stage::Repaired, "x")
            .and_then(|r| r.promote())
            .unwrap();
        assert!(validated.advance(Stage::Raw, "y").is_err());
        assert!(validated.promote().is_err());
    }
}
