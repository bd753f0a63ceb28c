//! Configuration Management
//!
//! Handles persistent configuration storage for tarm.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Public Azure cloud management endpoint
pub const DEFAULT_ARM_URL: &str = "https://management.azure.com";

/// Public Azure cloud portal
pub const DEFAULT_PORTAL_URL: &str = "https://portal.azure.com";

/// Values given on the command line. They apply to this run only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliOverrides {
    pub endpoint: Option<String>,
    pub tenant_id: Option<String>,
}

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Management endpoint override (sovereign clouds, test servers)
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Tenant to request tokens for
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Namespaces shown under "Providers". Empty means all of them.
    #[serde(default)]
    pub provider_filter: Vec<String>,
    /// Path substring -> api-version pinned for matching requests
    #[serde(default)]
    pub api_version_overrides: BTreeMap<String, String>,
    /// Fail instead of returning partial results when pagination hits the cap
    #[serde(default)]
    pub strict_pagination: bool,
    /// Never written to disk
    #[serde(skip)]
    pub cli: CliOverrides,
}

impl Config {
    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("tarm").join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        Self::load_from(&path)
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &std::path::Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable config {:?}: {}", path, e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Get effective endpoint (CLI > config > public cloud), without trailing slash
    pub fn effective_endpoint(&self) -> String {
        self.cli
            .endpoint
            .as_deref()
            .or(self.endpoint.as_deref())
            .unwrap_or(DEFAULT_ARM_URL)
            .trim_end_matches('/')
            .to_string()
    }

    /// Get effective tenant (CLI > config)
    pub fn effective_tenant(&self) -> Option<String> {
        self.cli.tenant_id.clone().or_else(|| self.tenant_id.clone())
    }

    /// Replace the provider filter and save.
    ///
    /// Selecting every known namespace is the same as no filter at all.
    pub fn set_provider_filter(&mut self, selected: Vec<String>, all: &[String]) -> Result<()> {
        self.apply_provider_filter(selected, all);
        self.save()
    }

    /// Same as [`Config::set_provider_filter`], saving to an explicit path
    pub fn set_provider_filter_at(
        &mut self,
        path: &std::path::Path,
        selected: Vec<String>,
        all: &[String],
    ) -> Result<()> {
        self.apply_provider_filter(selected, all);
        self.save_to(path)
    }

    fn apply_provider_filter(&mut self, selected: Vec<String>, all: &[String]) {
        self.provider_filter = if !all.is_empty() && selected.len() >= all.len() {
            Vec::new()
        } else {
            selected
        };
    }

    /// Find the api-version pinned for a request path
    pub fn api_version_override(&self, path: &str) -> Option<(&str, &str)> {
        pinned_api_version(&self.api_version_overrides, path)
    }
}

/// First override whose key occurs (case-insensitively) in `path`, as `(fragment, version)`
pub fn pinned_api_version<'a>(
    overrides: &'a BTreeMap<String, String>,
    path: &str,
) -> Option<(&'a str, &'a str)> {
    let lower = path.to_lowercase();
    overrides
        .iter()
        .find(|(fragment, _)| lower.contains(&fragment.to_lowercase()))
        .map(|(fragment, version)| (fragment.as_str(), version.as_str()))
}
