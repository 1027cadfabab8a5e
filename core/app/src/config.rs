//! Application configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use veilvault_common::{Error, Result};
use veilvault_crypto::EngineConfig;

/// Top-level configuration. Every field has a default, so an empty JSON
/// object is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Fallback tracing filter when `RUST_LOG` is not set.
    pub log_filter: String,
    pub engine: EngineConfig,
    /// Provider-specific configuration keyed by provider id, handed to the
    /// provider factory as-is.
    pub providers: HashMap<String, Value>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            engine: EngineConfig::default(),
            providers: HashMap::new(),
        }
    }
}

impl AppConfig {
    /// Default location: `<config dir>/veilvault/config.json`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("veilvault")
            .join("config.json")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Load from `path`. A missing file yields the defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(json) => Self::from_json(&json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, self.to_json()?).await?;
        Ok(())
    }

    /// Configuration for one provider; `Null` when none is set.
    pub fn provider_config(&self, provider: &str) -> Value {
        self.providers.get(provider).cloned().unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_empty_object_is_default() {
        let config = AppConfig::from_json("{}").unwrap();
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.engine.request_timeout, Duration::from_secs(30));
        assert_eq!(config.engine.startup_timeout, Duration::from_secs(10));
        assert!(config.provider_config("gdrive").is_null());
    }

    #[test]
    fn test_partial_override() {
        let config = AppConfig::from_json(
            r#"{
                "log_filter": "veilvault=debug",
                "engine": { "queue_depth": 8 },
                "providers": { "gdrive": { "page_size": 50 } }
            }"#,
        )
        .unwrap();
        assert_eq!(config.log_filter, "veilvault=debug");
        assert_eq!(config.engine.queue_depth, 8);
        assert_eq!(config.engine.request_timeout, Duration::from_secs(30));
        assert_eq!(config.provider_config("gdrive")["page_size"], 50);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            AppConfig::from_json("{not json"),
            Err(Error::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        assert_eq!(AppConfig::load(&path).await.unwrap().log_filter, "info");

        let mut config = AppConfig::default();
        config.log_filter = "warn".to_string();
        config.save(&path).await.unwrap();
        assert_eq!(AppConfig::load(&path).await.unwrap().log_filter, "warn");
    }
}
