//! Saved apps and their JSON-file library

use crate::error::{VantageError, VantageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use vantage_source::AppPreamble;

const DEFAULT_ICON: &str = "✨";

/// Test state of a saved app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    #[default]
    Untested,
    Testing,
    Passed,
    Failed,
    /// A fix request is in flight
    Healing,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Untested => "untested",
            TestStatus::Testing => "testing",
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Healing => "healing",
        }
    }
}

/// Display metadata for an app
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMetadata {
    pub name: String,
    pub icon: String,
    pub description: String,
}

impl AppMetadata {
    /// Parse the JSON object of a metadata response. Surrounding prose and
    /// code fences are ignored.
    pub fn from_response(text: &str) -> VantageResult<Self> {
        let start = text.find('{');
        let end = text.rfind('}');
        let json = match (start, end) {
            (Some(start), Some(end)) if start < end => &text[start..=end],
            _ => {
                return Err(VantageError::MalformedResponse(
                    "Metadata response contains no JSON object".to_string(),
                ))
            }
        };

        #[derive(Deserialize)]
        struct Raw {
            name: Option<String>,
            icon: Option<String>,
            description: Option<String>,
        }

        let raw: Raw = serde_json::from_str(json).map_err(|e| {
            VantageError::MalformedResponse(format!("Invalid metadata JSON: {}", e))
        })?;
        let name = raw
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                VantageError::MalformedResponse("Metadata response has no name".to_string())
            })?;
        Ok(Self {
            icon: raw
                .icon
                .map(|i| i.trim().to_string())
                .filter(|i| !i.is_empty())
                .unwrap_or_else(|| DEFAULT_ICON.to_string()),
            description: raw
                .description
                .map(|d| d.trim().to_string())
                .unwrap_or_default(),
            name,
        })
    }

    /// Metadata from a component's preamble, filling gaps from the request.
    pub fn from_preamble(preamble: &AppPreamble, request: &str) -> Self {
        Self {
            name: preamble
                .name
                .clone()
                .unwrap_or_else(|| default_name(request)),
            icon: preamble
                .icon
                .clone()
                .unwrap_or_else(|| DEFAULT_ICON.to_string()),
            description: preamble
                .description
                .clone()
                .unwrap_or_else(|| request.trim().to_string()),
        }
    }
}

fn default_name(request: &str) -> String {
    let words: Vec<&str> = request.split_whitespace().take(4).collect();
    if words.is_empty() {
        "Untitled App".to_string()
    } else {
        words.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedApp {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub test_status: TestStatus,
    #[serde(default)]
    pub last_test_errors: Vec<String>,
    /// Whether the stored code is the fallback placeholder
    #[serde(default)]
    pub is_fallback: bool,
}

impl SavedApp {
    pub fn new(metadata: AppMetadata, code: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: metadata.name,
            description: metadata.description,
            icon: metadata.icon,
            code: code.into(),
            created_at: now,
            updated_at: now,
            test_status: TestStatus::Untested,
            last_test_errors: Vec::new(),
            is_fallback: false,
        }
    }
}

/// Apps persisted as one JSON array.
#[derive(Debug)]
pub struct AppLibrary {
    path: PathBuf,
    apps: Vec<SavedApp>,
}

impl AppLibrary {
    /// Open the library at `path`. A missing file is an empty library.
    pub async fn open(path: impl Into<PathBuf>) -> VantageResult<Self> {
        let path = path.into();
        let apps = match fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => Vec::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(VantageError::Io(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        debug!(path = %path.display(), count = apps.len(), "App library loaded");
        Ok(Self { path, apps })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn list(&self) -> &[SavedApp] {
        &self.apps
    }

    /// Look up by full id or unique id prefix.
    pub fn get(&self, id: &str) -> Option<&SavedApp> {
        self.index_of(id).map(|i| &self.apps[i])
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        if let Some(i) = self.apps.iter().position(|a| a.id == id) {
            return Some(i);
        }
        if id.is_empty() {
            return None;
        }
        let mut matches = self
            .apps
            .iter()
            .enumerate()
            .filter(|(_, a)| a.id.starts_with(id));
        match (matches.next(), matches.next()) {
            (Some((i, _)), None) => Some(i),
            _ => None,
        }
    }

    pub async fn add(&mut self, app: SavedApp) -> VantageResult<()> {
        self.apps.push(app);
        self.save().await
    }

    pub async fn remove(&mut self, id: &str) -> VantageResult<bool> {
        match self.index_of(id) {
            Some(i) => {
                self.apps.remove(i);
                self.save().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Replace an app's code, resetting its test state.
    pub async fn update_code(&mut self, id: &str, code: String) -> VantageResult<()> {
        let i = self.require(id)?;
        let app = &mut self.apps[i];
        app.code = code;
        app.updated_at = Utc::now();
        app.test_status = TestStatus::Untested;
        app.last_test_errors.clear();
        app.is_fallback = false;
        self.save().await
    }

    pub async fn record_test(
        &mut self,
        id: &str,
        status: TestStatus,
        errors: Vec<String>,
    ) -> VantageResult<()> {
        let i = self.require(id)?;
        let app = &mut self.apps[i];
        app.test_status = status;
        app.last_test_errors = errors;
        self.save().await
    }

    fn require(&self, id: &str) -> VantageResult<usize> {
        self.index_of(id)
            .ok_or_else(|| VantageError::Configuration(format!("No saved app with id '{}'", id)))
    }

    async fn save(&self) -> VantageResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let content = serde_json::to_string_pretty(&self.apps)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
