//! Configuration loading.
//!
//! YAML file resolved from an explicit path or the `INVENTORY_CONFIG`
//! environment variable, with sensible defaults when neither is present.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

fn default_database_url() -> String {
    "sqlite://inventory.db".to_string()
}

fn default_api_base_url() -> String {
    "http://127.0.0.1:8085/v1".to_string()
}

fn default_max_workers() -> usize {
    8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Base URL of the provider's enumeration surface.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Crawl roots as `type/key` references, e.g. `organization/123`.
    #[serde(default)]
    pub roots: Vec<String>,

    /// Bound on concurrent enumeration work items.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            api_base_url: default_api_base_url(),
            roots: Vec::new(),
            max_workers: default_max_workers(),
        }
    }
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: AppConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Explicit path, then `INVENTORY_CONFIG`, then defaults.
    pub fn resolve(path: Option<&str>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        if let Ok(path) = std::env::var("INVENTORY_CONFIG") {
            return Self::load(path);
        }
        Ok(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_usable() {
        let config = AppConfig::default();
        assert_eq!(config.max_workers, 8);
        assert!(config.roots.is_empty());
        assert!(config.database_url.starts_with("sqlite://"));
    }

    #[test]
    fn loads_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "roots:\n  - organization/123\nmax_workers: 4"
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.roots, vec!["organization/123"]);
        assert_eq!(config.max_workers, 4);
        // Unspecified fields fall back to defaults.
        assert_eq!(config.database_url, "sqlite://inventory.db");
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(AppConfig::load("/nonexistent/inventory.yaml").is_err());
    }
}
