//! Bridge configuration: YAML with `${VAR}` substitution, plus env overrides.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::LevelFilter;

/// Names a YAML config file to load at init.
pub const CONFIG_ENV: &str = "DSBRIDGE_CONFIG";
/// Overrides [`BridgeConfig::log_level`].
pub const LOG_ENV: &str = "DSBRIDGE_LOG";

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Level for the installed tracing subscriber (`RUST_LOG` wins).
    pub log_level: String,
    /// Install a global tracing subscriber on init.
    pub install_logging: bool,
    /// Include event targets (module paths) in log lines.
    pub log_targets: bool,
    pub scan: ScanConfig,
    pub write: WriteConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            install_logging: true,
            log_targets: false,
            scan: ScanConfig::default(),
            write: WriteConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanConfig {
    /// Used when the host passes a batch size of zero or less.
    pub default_batch_size: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            default_batch_size: 32_768,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WriteConfig {
    /// Used when the host passes a max-partitions of zero or less.
    pub default_max_partitions: usize,
    /// Used when the host passes an empty basename template.
    pub default_basename_template: String,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            default_max_partitions: 1024,
            default_basename_template: "part-{i}.parquet".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Parse a YAML document after env var substitution.
    ///
    /// # Errors
    ///
    /// Returns an error if substitution fails, the YAML is invalid, or a
    /// value is out of range.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let substituted = substitute_env_vars(yaml)?;
        let config: Self = if substituted.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&substituted).context("Failed to parse bridge config YAML")?
        };
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read bridge config: {}", path.display()))?;
        Self::from_yaml_str(&content)
    }

    /// Defaults, or the file named by `DSBRIDGE_CONFIG`, with `DSBRIDGE_LOG`
    /// applied on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the named file cannot be loaded.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        if let Ok(level) = std::env::var(LOG_ENV) {
            config.log_level = level;
            config.validate()?;
        }
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.log_level
            .parse::<LevelFilter>()
            .with_context(|| format!("invalid log_level '{}'", self.log_level))?;
        if self.scan.default_batch_size == 0 {
            anyhow::bail!("scan.default_batch_size must be positive");
        }
        if self.write.default_max_partitions == 0 {
            anyhow::bail!("write.default_max_partitions must be positive");
        }
        if !self.write.default_basename_template.contains("{i}") {
            anyhow::bail!(
                "write.default_basename_template must contain '{{i}}', got '{}'",
                self.write.default_basename_template
            );
        }
        Ok(())
    }
}

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error if any referenced environment variable is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing = Vec::new();
    let result = ENV_VAR_RE.replace_all(input, |cap: &regex::Captures<'_>| {
        std::env::var(&cap[1]).unwrap_or_else(|_| {
            missing.push(cap[1].to_string());
            String::new()
        })
    });
    if !missing.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }
    Ok(result.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.scan.default_batch_size, 32_768);
        assert_eq!(config.write.default_max_partitions, 1024);
        assert_eq!(config.write.default_basename_template, "part-{i}.parquet");
        assert_eq!(BridgeConfig::from_yaml_str("").unwrap(), config);
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let config = BridgeConfig::from_yaml_str("scan:\n  default_batch_size: 1024\n").unwrap();
        assert_eq!(config.scan.default_batch_size, 1024);
        assert_eq!(config.write, WriteConfig::default());
    }

    #[test]
    fn env_substitution() {
        std::env::set_var("DSB_TEST_LEVEL", "debug");
        let config = BridgeConfig::from_yaml_str("log_level: ${DSB_TEST_LEVEL}\n").unwrap();
        assert_eq!(config.log_level, "debug");
        std::env::remove_var("DSB_TEST_LEVEL");
    }

    #[test]
    fn missing_env_var_fails() {
        let err = substitute_env_vars("${DSB_TEST_DEFINITELY_UNSET}").unwrap_err();
        assert!(err.to_string().contains("DSB_TEST_DEFINITELY_UNSET"));
    }

    #[test]
    fn invalid_values_rejected() {
        assert!(BridgeConfig::from_yaml_str("scan:\n  default_batch_size: 0\n").is_err());
        assert!(BridgeConfig::from_yaml_str("write:\n  default_basename_template: x.parquet\n").is_err());
        assert!(BridgeConfig::from_yaml_str("unknown_key: 1\n").is_err());
        let err = BridgeConfig::from_yaml_str("log_level: chatty\n").unwrap_err();
        assert!(err.to_string().contains("invalid log_level 'chatty'"));
    }

    #[test]
    fn logging_keys() {
        let config =
            BridgeConfig::from_yaml_str("log_level: trace\nlog_targets: true\ninstall_logging: false\n")
                .unwrap();
        assert_eq!(config.log_level, "trace");
        assert!(config.log_targets);
        assert!(!config.install_logging);
    }

    #[test]
    fn from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.yaml");
        std::fs::write(&path, "write:\n  default_max_partitions: 8\n").unwrap();
        let config = BridgeConfig::from_file(&path).unwrap();
        assert_eq!(config.write.default_max_partitions, 8);
        assert!(BridgeConfig::from_file(&dir.path().join("missing.yaml")).is_err());
    }
}
