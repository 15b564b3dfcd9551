//! Bridge configuration.
//!
//! Limits are enforced by the dispatcher. Per-tag loader options are opaque to
//! the core: they are handed to the loader's context untouched.

use std::{collections::BTreeMap, env, fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable naming a JSON configuration file.
pub const CONFIG_ENV: &str = "POLYCALL_CONFIG";

/// Environment variable overriding [`BridgeConfig::max_call_depth`].
pub const MAX_CALL_DEPTH_ENV: &str = "POLYCALL_MAX_CALL_DEPTH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Maximum number of nested cross-boundary frames per thread.
    pub max_call_depth: usize,

    /// Advisory invoke timeout. Exceeding it marks the loader degraded.
    pub invoke_timeout_ms: Option<u64>,

    /// Per-tag loader options.
    pub loaders: BTreeMap<String, LoaderConfig>,
}

/// Options forwarded to one loader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Search paths a guest runtime uses to locate sibling packages.
    pub execution_paths: Vec<String>,

    pub options: BTreeMap<String, String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            max_call_depth: 64,
            invoke_timeout_ms: None,
            loaders: BTreeMap::new(),
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: BridgeConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Defaults, then the file named by `POLYCALL_CONFIG`, then
    /// `POLYCALL_MAX_CALL_DEPTH`.
    pub fn from_env() -> Result<Self> {
        let mut config = match env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_path(path)?,
            None => Self::default(),
        };
        if let Ok(depth) = env::var(MAX_CALL_DEPTH_ENV) {
            config.max_call_depth = depth.trim().parse().map_err(|_| {
                Error::Config(format!("{} must be a positive integer", MAX_CALL_DEPTH_ENV))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_invoke_timeout(mut self, timeout: Duration) -> Self {
        self.invoke_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_loader(mut self, tag: impl Into<String>, loader: LoaderConfig) -> Self {
        self.loaders.insert(tag.into(), loader);
        self
    }

    pub fn invoke_timeout(&self) -> Option<Duration> {
        self.invoke_timeout_ms.map(Duration::from_millis)
    }

    /// Options for `tag`, or the empty set.
    pub fn loader(&self, tag: &str) -> LoaderConfig {
        self.loaders.get(tag).cloned().unwrap_or_default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_call_depth == 0 {
            return Err(Error::Config("max_call_depth must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl LoaderConfig {
    pub fn with_execution_path(mut self, path: impl Into<String>) -> Self {
        self.execution_paths.push(path.into());
        self
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = BridgeConfig::from_json(
            r#"{ "loaders": { "py": { "execution_paths": ["/opt/scripts"] } } }"#,
        )
        .unwrap();
        assert_eq!(config.max_call_depth, 64);
        assert_eq!(config.loader("py").execution_paths, vec!["/opt/scripts"]);
        assert_eq!(config.loader("node"), LoaderConfig::default());
    }

    #[test]
    fn zero_depth_is_rejected() {
        let err = BridgeConfig::from_json(r#"{ "max_call_depth": 0 }"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn timeout_is_exposed_as_duration() {
        let config = BridgeConfig::new().with_invoke_timeout(Duration::from_millis(250));
        assert_eq!(config.invoke_timeout(), Some(Duration::from_millis(250)));
    }
}
