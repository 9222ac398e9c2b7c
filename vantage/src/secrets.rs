//! Secret store implementation with layered resolution
//!
//! Resolution order (higher priority first):
//! 1. Local project secrets (.vantage/secrets.toml)
//! 2. Environment variables (runtime)
//! 3. Value baked in at build time

use crate::error::{VantageError, VantageResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Build-time key, if the binary was compiled with one.
const BUILD_TIME_KEY: Option<&str> = option_env!("GEMINI_API_KEY");

/// Secrets file format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SecretsFile {
    #[serde(default)]
    secrets: HashMap<String, String>,
}

/// Where a resolved key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Local,
    Environment,
    BuildTime,
}

/// A resolved API key. Debug output never shows the value.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey {
    value: String,
    source: KeySource,
}

impl ApiKey {
    pub fn new(value: impl Into<String>, source: KeySource) -> Self {
        Self {
            value: value.into(),
            source,
        }
    }

    pub fn expose(&self) -> &str {
        &self.value
    }

    pub fn source(&self) -> KeySource {
        self.source
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKey")
            .field("value", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

/// Layered secret store with local file and env var fallback
pub struct SecretStore {
    /// Path to local secrets file (.vantage/secrets.toml)
    local_path: Option<PathBuf>,
    /// In-memory cache of local secrets
    local_secrets: HashMap<String, String>,
    build_time: Option<String>,
}

impl SecretStore {
    /// Create a new SecretStore, loading from the given project directory
    pub fn new(project_dir: Option<PathBuf>) -> VantageResult<Self> {
        let local_path = project_dir.map(|p| p.join(".vantage").join("secrets.toml"));
        let local_secrets = match local_path {
            Some(ref path) => Self::load_from_file(path)?,
            None => HashMap::new(),
        };

        Ok(Self {
            local_path,
            local_secrets,
            build_time: BUILD_TIME_KEY.map(str::to_string),
        })
    }

    /// Replace the build-time layer. Used by tests and embedders.
    pub fn with_build_time(mut self, value: Option<String>) -> Self {
        self.build_time = value;
        self
    }

    fn load_from_file(path: &Path) -> VantageResult<HashMap<String, String>> {
        if !path.exists() {
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| VantageError::Io(format!("Failed to read secrets file: {}", e)))?;

        let file: SecretsFile = toml::from_str(&content).map_err(|e| {
            VantageError::Configuration(format!("Failed to parse secrets file: {}", e))
        })?;

        Ok(file.secrets)
    }

    /// Get a secret by name. Resolution order: local file → env var
    pub fn get(&self, name: &str) -> Option<String> {
        if let Some(val) = self.local_secrets.get(name) {
            return Some(val.clone());
        }
        std::env::var(name).ok().filter(|v| !v.trim().is_empty())
    }

    /// Check if a secret is available (without revealing value)
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Resolve the generation API key stored under `name`, including the
    /// build-time layer. Absence of every layer is a configuration error.
    pub fn resolve_api_key(&self, name: &str) -> VantageResult<ApiKey> {
        if let Some(val) = self.local_secrets.get(name) {
            return Ok(ApiKey::new(val.clone(), KeySource::Local));
        }
        if let Some(val) = std::env::var(name).ok().filter(|v| !v.trim().is_empty()) {
            return Ok(ApiKey::new(val, KeySource::Environment));
        }
        if let Some(val) = self.build_time.as_ref().filter(|v| !v.trim().is_empty()) {
            return Ok(ApiKey::new(val.clone(), KeySource::BuildTime));
        }
        Err(VantageError::Configuration(format!(
            "No API key available: set {} or store it with `vantage secrets set {}`",
            name, name
        )))
    }

    /// Store a secret in the local project file
    pub fn set_local(&mut self, name: &str, value: String) -> VantageResult<()> {
        self.local_secrets.insert(name.to_string(), value);
        self.save()
    }

    /// Save secrets to the local file
    pub fn save(&self) -> VantageResult<()> {
        let path = self.local_path.as_ref().ok_or_else(|| {
            VantageError::Configuration("No local path configured for secrets".to_string())
        })?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                VantageError::Io(format!("Failed to create secrets directory: {}", e))
            })?;
        }

        let file = SecretsFile {
            secrets: self.local_secrets.clone(),
        };

        let content = toml::to_string_pretty(&file)
            .map_err(|e| VantageError::Serialization(format!("Failed to serialize secrets: {}", e)))?;

        fs::write(path, &content)
            .map_err(|e| VantageError::Io(format!("Failed to write secrets file: {}", e)))?;

        // Set restrictive permissions on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(path, perms).map_err(|e| {
                VantageError::Io(format!("Failed to set file permissions: {}", e))
            })?;
        }

        Ok(())
    }

    /// Remove a secret from local storage
    pub fn remove(&mut self, name: &str) -> VantageResult<bool> {
        let existed = self.local_secrets.remove(name).is_some();
        if existed {
            self.save()?;
        }
        Ok(existed)
    }

    /// List all known secret names (from local file, not env vars)
    pub fn list_local(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.local_secrets.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_env_var_fallback() {
        std::env::set_var("VANTAGE_TEST_SECRET_XYZ", "test_value");
        let store = SecretStore::new(None).unwrap();
        assert_eq!(
            store.get("VANTAGE_TEST_SECRET_XYZ"),
            Some("test_value".to_string())
        );
        std::env::remove_var("VANTAGE_TEST_SECRET_XYZ");
    }

    #[test]
    fn test_local_overrides_env() {
        std::env::set_var("VANTAGE_TEST_SECRET_ABC", "env_value");

        let dir = tempdir().unwrap();
        let mut store = SecretStore::new(Some(dir.path().to_path_buf())).unwrap();
        store
            .set_local("VANTAGE_TEST_SECRET_ABC", "local_value".to_string())
            .unwrap();

        let key = store.resolve_api_key("VANTAGE_TEST_SECRET_ABC").unwrap();
        assert_eq!(key.expose(), "local_value");
        assert_eq!(key.source(), KeySource::Local);

        std::env::remove_var("VANTAGE_TEST_SECRET_ABC");
    }

    #[test]
    fn test_resolution_order() {
        let name = "VANTAGE_TEST_SECRET_ORDER";
        std::env::remove_var(name);
        let store = SecretStore::new(None)
            .unwrap()
            .with_build_time(Some("baked".to_string()));
        let key = store.resolve_api_key(name).unwrap();
        assert_eq!(key.source(), KeySource::BuildTime);

        std::env::set_var(name, "from_env");
        let key = store.resolve_api_key(name).unwrap();
        assert_eq!(key.source(), KeySource::Environment);
        assert_eq!(key.expose(), "from_env");
        std::env::remove_var(name);
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let store = SecretStore::new(None).unwrap().with_build_time(None);
        let err = store
            .resolve_api_key("VANTAGE_TEST_SECRET_MISSING")
            .unwrap_err();
        assert!(matches!(err, VantageError::Configuration(_)));
    }

    #[test]
    fn test_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().to_path_buf();

        {
            let mut store = SecretStore::new(Some(path.clone())).unwrap();
            store
                .set_local("PERSIST_SECRET", "persisted".to_string())
                .unwrap();
        }

        {
            let mut store = SecretStore::new(Some(path.clone())).unwrap();
            assert_eq!(store.get("PERSIST_SECRET"), Some("persisted".to_string()));
            assert_eq!(store.list_local(), vec!["PERSIST_SECRET"]);
            assert!(store.remove("PERSIST_SECRET").unwrap());
        }

        let store = SecretStore::new(Some(path)).unwrap();
        assert!(store.list_local().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let mut store = SecretStore::new(Some(dir.path().to_path_buf())).unwrap();
        store.set_local("PERM_SECRET", "x".to_string()).unwrap();
        let meta = fs::metadata(dir.path().join(".vantage/secrets.toml")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn test_debug_redacts_value() {
        let key = ApiKey::new("super-secret", KeySource::Local);
        assert!(!format!("{:?}", key).contains("super-secret"));
    }
}
