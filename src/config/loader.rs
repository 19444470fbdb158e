//! Configuration loader with environment variable expansion

use super::{Config, ConfigError};
use lazy_static::lazy_static;
use regex_lite::{Captures, Regex};
use std::path::Path;
use tracing::info;

lazy_static! {
    // ${VAR} or ${VAR:-default}
    static ref ENV_VAR: Regex =
        Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();
}

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load, expand, parse and validate a configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::parse(&content)?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn parse(content: &str) -> Result<Config, ConfigError> {
        let expanded = Self::expand_env_vars(content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Expand `${VAR}` and `${VAR:-default}`.
    ///
    /// An unset variable without a default keeps its placeholder.
    fn expand_env_vars(content: &str) -> String {
        ENV_VAR
            .replace_all(content, |cap: &Captures<'_>| {
                match (std::env::var(&cap[1]), cap.get(2)) {
                    (Ok(value), _) => value,
                    (Err(_), Some(default)) => default.as_str().to_string(),
                    (Err(_), None) => cap[0].to_string(),
                }
            })
            .into_owned()
    }
}
