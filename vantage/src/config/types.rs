use crate::error::{VantageError, VantageResult};
use crate::request::FlowKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "vantage.toml";

/// Top-level runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VantageConfig {
    pub llm: LlmConfig,
    pub retry: RetryConfig,
    pub sandbox: SandboxConfig,
    pub storage: StorageConfig,
}

impl VantageConfig {
    /// Load configuration from an explicit path, or from `vantage.toml` in
    /// the working directory when present. Falls back to defaults.
    pub fn load(path: Option<&Path>) -> VantageResult<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = Path::new(CONFIG_FILE_NAME);
                if default_path.exists() {
                    Self::from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> VantageResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            VantageError::Configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> VantageResult<Self> {
        let config: VantageConfig = toml::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    /// Reject values no flow can run with.
    pub fn check(&self) -> VantageResult<()> {
        if self.retry.create_attempts == 0 || self.retry.fix_attempts == 0 {
            return Err(VantageError::Configuration(
                "retry attempts must be at least 1".to_string(),
            ));
        }
        if self.sandbox.poll_interval_ms == 0 {
            return Err(VantageError::Configuration(
                "sandbox.poll_interval_ms must be positive".to_string(),
            ));
        }
        for origin in &self.sandbox.allowed_origins {
            url::Url::parse(origin).map_err(|e| {
                VantageError::Configuration(format!("Invalid allowed origin '{}': {}", origin, e))
            })?;
        }
        Ok(())
    }
}

/// Generation backend types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderType {
    #[default]
    Gemini,
    /// Deterministic scripted responses
    Stub,
}

/// Generation backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProviderType,
    /// Model name/identifier
    pub model: String,
    /// Base URL for the generative-content API
    pub base_url: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Bound for code generation calls
    pub code_timeout_secs: u64,
    /// Bound for short metadata calls
    pub metadata_timeout_secs: u64,
    pub temperature: Option<f64>,
    pub max_output_tokens: Option<u32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProviderType::Gemini,
            model: "gemini-2.0-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            code_timeout_secs: 120,
            metadata_timeout_secs: 60,
            temperature: Some(0.7),
            max_output_tokens: Some(8192),
        }
    }
}

impl LlmConfig {
    pub fn code_timeout(&self) -> Duration {
        Duration::from_secs(self.code_timeout_secs)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }
}

/// Generation retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempt budget for the create flow
    pub create_attempts: u32,
    /// Attempt budget for fix and update flows
    pub fix_attempts: u32,
    /// Whether to send error feedback to the model on retry
    pub send_error_feedback: bool,
    /// Whether the create flow returns the fallback component on exhaustion
    pub use_fallback: bool,
    /// Minimum spacing between backend calls
    pub min_request_interval_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            create_attempts: 3,
            fix_attempts: 2,
            send_error_feedback: true,
            use_fallback: true,
            min_request_interval_ms: 0,
        }
    }
}

impl RetryConfig {
    pub fn attempts_for(&self, flow: FlowKind) -> u32 {
        match flow {
            FlowKind::Create => self.create_attempts,
            FlowKind::Fix | FlowKind::Update => self.fix_attempts,
        }
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }
}

/// Sandbox verifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub enabled: bool,
    pub node_binary: String,
    /// Process isolation around the node child
    pub jail: JailMode,
    pub validation_timeout_ms: u64,
    pub live_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Time given to effects and timers after the first render
    pub settle_ms: u64,
    /// Origins the embedding document may load scripts and styles from
    pub allowed_origins: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            node_binary: "node".to_string(),
            jail: JailMode::Auto,
            validation_timeout_ms: 5_000,
            live_timeout_ms: 10_000,
            poll_interval_ms: 100,
            settle_ms: 250,
            allowed_origins: vec![
                "https://unpkg.com".to_string(),
                "https://cdn.jsdelivr.net".to_string(),
                "https://cdn.tailwindcss.com".to_string(),
            ],
        }
    }
}

impl SandboxConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// How the node child is isolated from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JailMode {
    /// Use bubblewrap when it can create namespaces, otherwise run unjailed
    #[default]
    Auto,
    /// Refuse to run without bubblewrap
    Bubblewrap,
    /// Never use bubblewrap
    Off,
}

/// Local persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".vantage"),
        }
    }
}

impl StorageConfig {
    pub fn apps_path(&self) -> PathBuf {
        self.data_dir.join("apps.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = VantageConfig::default();
        assert_eq!(config.llm.code_timeout(), Duration::from_secs(120));
        assert_eq!(config.llm.metadata_timeout(), Duration::from_secs(60));
        assert_eq!(config.retry.attempts_for(FlowKind::Create), 3);
        assert_eq!(config.retry.attempts_for(FlowKind::Fix), 2);
        assert_eq!(config.retry.attempts_for(FlowKind::Update), 2);
        assert_eq!(config.sandbox.validation_timeout_ms, 5_000);
        assert_eq!(config.sandbox.live_timeout_ms, 10_000);
        assert_eq!(config.sandbox.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.sandbox.jail, JailMode::Auto);
        assert!(config.check().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = VantageConfig::from_toml(
            r#"
[llm]
provider = "stub"
model = "gemini-1.5-pro"

[retry]
create_attempts = 5
"#,
        )
        .unwrap();
        assert_eq!(config.llm.provider, LlmProviderType::Stub);
        assert_eq!(config.llm.model, "gemini-1.5-pro");
        assert_eq!(config.llm.api_key_env, "GEMINI_API_KEY");
        assert_eq!(config.retry.create_attempts, 5);
        assert_eq!(config.retry.fix_attempts, 2);
        assert!(config.sandbox.enabled);
    }

    #[test]
    fn jail_mode_parses() {
        let config = VantageConfig::from_toml("[sandbox]\njail = \"bubblewrap\"\n").unwrap();
        assert_eq!(config.sandbox.jail, JailMode::Bubblewrap);
        assert!(VantageConfig::from_toml("[sandbox]\njail = \"chroot\"\n").is_err());
    }

    #[test]
    fn zero_attempts_rejected() {
        let err = VantageConfig::from_toml("[retry]\nfix_attempts = 0\n").unwrap_err();
        assert!(matches!(err, VantageError::Configuration(_)));
    }

    #[test]
    fn bad_origin_rejected() {
        let err =
            VantageConfig::from_toml("[sandbox]\nallowed_origins = [\"not a url\"]\n").unwrap_err();
        assert!(err.to_string().contains("not a url"));
    }

    #[test]
    fn load_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[storage]\ndata_dir = \"/tmp/vantage-data\"").unwrap();
        let config = VantageConfig::load(Some(file.path())).unwrap();
        assert_eq!(
            config.storage.apps_path(),
            PathBuf::from("/tmp/vantage-data/apps.json")
        );
    }
}
