//! Reconciler configuration
//!
//! Settings can be built in code or read from a TOML file:
//!
//! ```toml
//! id_prefix = "Layer-"
//! max_warnings = 32
//! reset_removed_properties = true
//! ```
//!
//! Missing keys fall back to their defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use void_core::ConsumerId;

/// Errors from loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Tunables shared by every reconciler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Prefix for generated layer ids
    pub id_prefix: String,
    /// Warnings kept per reconciler before the oldest are dropped
    pub max_warnings: usize,
    /// Push a null value for paint/layout keys dropped from a descriptor
    pub reset_removed_properties: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            id_prefix: "Layer-".to_string(),
            max_warnings: 32,
            reset_removed_properties: true,
        }
    }
}

impl ReconcilerConfig {
    /// Parse from TOML text
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: ReconcilerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        log::debug!("Loading reconciler config from {}", path.display());
        Self::from_toml_str(&content)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.max_warnings == 0 {
            return Err(ConfigError::Validation(
                "max_warnings must be at least 1".to_string(),
            ));
        }
        if self.id_prefix.chars().any(char::is_whitespace) {
            return Err(ConfigError::Validation(format!(
                "id_prefix must not contain whitespace: {:?}",
                self.id_prefix
            )));
        }
        Ok(())
    }
}

/// Per-reconciler options
#[derive(Debug, Clone, Default)]
pub struct ReconcilerOptions {
    /// Explicit layer id; generated from the consumer id when absent
    pub layer_id: Option<String>,
    /// Overrides `config.id_prefix` for this reconciler
    pub id_prefix: Option<String>,
    pub config: ReconcilerConfig,
}

impl ReconcilerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer_id(mut self, layer_id: impl Into<String>) -> Self {
        self.layer_id = Some(layer_id.into());
        self
    }

    pub fn with_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = Some(prefix.into());
        self
    }

    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Layer id for a reconciler acting as `consumer`
    ///
    /// Generated ids embed the consumer id, which is process-unique, so two
    /// reconcilers never generate the same id.
    pub fn resolve_layer_id(&self, consumer: ConsumerId) -> String {
        match &self.layer_id {
            Some(id) => id.clone(),
            None => {
                let prefix = self.id_prefix.as_deref().unwrap_or(&self.config.id_prefix);
                format!("{}{}", prefix, consumer.raw())
            }
        }
    }
}
