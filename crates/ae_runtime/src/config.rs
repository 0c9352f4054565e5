//! Runtime Configuration
//!
//! # Configuration Sources (in priority order)
//!
//! 1. Command line: `assembler [PLUGIN_PATH]`
//! 2. Environment variables: `ASSEMBLER_PLUGIN_DIR`, `ASSEMBLER_LOG`,
//!    `ASSEMBLER_HOT_RELOAD`
//! 3. Config file: `./assembler.toml`, then `/etc/assembler/assembler.toml`
//! 4. Built-in defaults
//!
//! # Example Config File
//!
//! ```toml
//! plugin_dir = "plugins"
//! log_level = "debug"
//! registry_capacity = 64
//!
//! [hot_reload]
//! enabled = true
//! debounce_ms = 250
//! shadow_dir = "plugins/.shadow"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::LevelFilter;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Config files tried in order; the first one found wins
pub const CONFIG_PATHS: &[&str] = &["assembler.toml", "/etc/assembler/assembler.toml"];

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors raised while configuring or running the host
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML for [`RuntimeConfig`]
    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A setting holds a value it cannot take
    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },

    /// Plugin system error
    #[error("Plugin error: {0}")]
    Plugin(#[from] ae_plugin::PluginError),
}

impl RuntimeError {
    /// Create an invalid value error
    pub fn invalid_value(key: impl Into<String>, value: impl Into<String>) -> Self {
        RuntimeError::InvalidValue {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Hot-reload settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotReloadConfig {
    /// Watch the plugin directory and reload changed plugins
    pub enabled: bool,
    /// Wait this long for changes to settle before reloading
    pub debounce_ms: u64,
    /// Load shadow copies from here so sources can be rebuilt in place
    pub shadow_dir: Option<PathBuf>,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            debounce_ms: 500,
            shadow_dir: None,
        }
    }
}

/// Complete runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Directory (or single library) to load plugins from
    pub plugin_dir: PathBuf,
    /// Default log filter, overridden by `RUST_LOG`
    pub log_level: String,
    /// Initial bucket count of the API registry
    pub registry_capacity: usize,
    /// Hot-reload settings
    pub hot_reload: HotReloadConfig,
    /// File the configuration was read from
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            plugin_dir: PathBuf::from("."),
            log_level: "info".to_string(),
            registry_capacity: ae_core::hash_map::DEFAULT_CAPACITY,
            hot_reload: HotReloadConfig::default(),
            config_path: None,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from all sources
    ///
    /// Runs before logging is set up, so problems are returned in the
    /// second element for the caller to log.
    pub fn load() -> (Self, Vec<String>) {
        let mut warnings = Vec::new();

        let mut config = match Self::discover(CONFIG_PATHS) {
            Ok(config) => config,
            Err(e) => {
                warnings.push(e.to_string());
                Self::default()
            }
        };

        let rejected = config.apply_env(|key| std::env::var(key).ok());
        warnings.extend(rejected.iter().map(ToString::to_string));
        config.apply_args(std::env::args().skip(1));

        (config, warnings)
    }

    /// Read the first existing file of `paths`, or defaults if none exists
    pub fn discover(paths: &[impl AsRef<Path>]) -> Result<Self> {
        for path in paths {
            let path = path.as_ref();
            if path.is_file() {
                return Self::load_from_file(path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let mut config = Self::from_toml_str(&content)?;
        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides read through `var`
    ///
    /// Each variable is applied on its own; a rejected value leaves that
    /// setting unchanged and is returned, the others still take effect.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Vec<RuntimeError> {
        let mut errors = Vec::new();

        if let Some(dir) = var("ASSEMBLER_PLUGIN_DIR").filter(|d| !d.is_empty()) {
            self.plugin_dir = PathBuf::from(dir);
        }

        if let Some(level) = var("ASSEMBLER_LOG").filter(|l| !l.is_empty()) {
            if level.parse::<LevelFilter>().is_ok() {
                self.log_level = level;
            } else {
                errors.push(RuntimeError::invalid_value("ASSEMBLER_LOG", level));
            }
        }

        if let Some(flag) = var("ASSEMBLER_HOT_RELOAD") {
            match flag.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.hot_reload.enabled = true,
                "0" | "false" | "no" | "off" | "" => self.hot_reload.enabled = false,
                _ => errors.push(RuntimeError::invalid_value("ASSEMBLER_HOT_RELOAD", flag)),
            }
        }

        errors
    }

    /// Apply command line arguments (program name excluded)
    ///
    /// The first argument not starting with `--` is the plugin path.
    pub fn apply_args<I, S>(&mut self, args: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let path = args.into_iter().find(|arg| {
            let arg: &str = arg.as_ref();
            !arg.starts_with("--")
        });

        if let Some(path) = path {
            let path: &str = path.as_ref();
            self.plugin_dir = PathBuf::from(path);
        }
    }

    /// Check every setting holds a usable value
    pub fn validate(&self) -> Result<()> {
        self.log_filter()?;
        if self.registry_capacity == 0 {
            return Err(RuntimeError::invalid_value("registry_capacity", "0"));
        }
        Ok(())
    }

    /// Log level as a filter
    pub fn log_filter(&self) -> Result<LevelFilter> {
        self.log_level
            .parse()
            .map_err(|_| RuntimeError::invalid_value("log_level", self.log_level.as_str()))
    }

    /// Hot-reload debounce window
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.hot_reload.debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.plugin_dir, PathBuf::from("."));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.registry_capacity, 16);
        assert!(!config.hot_reload.enabled);
        assert_eq!(config.debounce(), Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_file() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            plugin_dir = "plugins"
            log_level = "debug"
            registry_capacity = 64

            [hot_reload]
            enabled = true
            debounce_ms = 250
            shadow_dir = "plugins/.shadow"
            "#,
        )
        .unwrap();

        assert_eq!(config.plugin_dir, PathBuf::from("plugins"));
        assert_eq!(config.log_filter().unwrap(), LevelFilter::Debug);
        assert_eq!(config.registry_capacity, 64);
        assert!(config.hot_reload.enabled);
        assert_eq!(config.debounce(), Duration::from_millis(250));
        assert_eq!(config.hot_reload.shadow_dir, Some(PathBuf::from("plugins/.shadow")));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = RuntimeConfig::from_toml_str("plugin_dir = \"mods\"").unwrap();
        assert_eq!(config.plugin_dir, PathBuf::from("mods"));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.hot_reload, HotReloadConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            RuntimeConfig::from_toml_str("log_level = \"chatty\""),
            Err(RuntimeError::InvalidValue { .. })
        ));
        assert!(matches!(
            RuntimeConfig::from_toml_str("registry_capacity = 0"),
            Err(RuntimeError::InvalidValue { .. })
        ));
        assert!(matches!(
            RuntimeConfig::from_toml_str("plugin_dir = 3"),
            Err(RuntimeError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = RuntimeConfig::default();
        let errors = config.apply_env(env(&[
            ("ASSEMBLER_PLUGIN_DIR", "/opt/plugins"),
            ("ASSEMBLER_LOG", "warn"),
            ("ASSEMBLER_HOT_RELOAD", "on"),
        ]));
        assert!(errors.is_empty());

        assert_eq!(config.plugin_dir, PathBuf::from("/opt/plugins"));
        assert_eq!(config.log_level, "warn");
        assert!(config.hot_reload.enabled);
    }

    #[test]
    fn test_bad_env_flag() {
        let mut config = RuntimeConfig::default();
        let errors = config.apply_env(env(&[("ASSEMBLER_HOT_RELOAD", "sometimes")]));
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], RuntimeError::InvalidValue { ref key, .. } if key == "ASSEMBLER_HOT_RELOAD"));
        assert!(!config.hot_reload.enabled);
    }

    #[test]
    fn test_bad_env_value_does_not_mask_others() {
        let mut config = RuntimeConfig::default();
        let errors = config.apply_env(env(&[
            ("ASSEMBLER_PLUGIN_DIR", "/opt/plugins"),
            ("ASSEMBLER_LOG", "chatty"),
            ("ASSEMBLER_HOT_RELOAD", "yes"),
        ]));

        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], RuntimeError::InvalidValue { ref key, .. } if key == "ASSEMBLER_LOG"));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.plugin_dir, PathBuf::from("/opt/plugins"));
        assert!(config.hot_reload.enabled);

        let errors = config.apply_env(env(&[
            ("ASSEMBLER_LOG", "chatty"),
            ("ASSEMBLER_HOT_RELOAD", "maybe"),
        ]));
        assert_eq!(errors.len(), 2);
        assert!(config.hot_reload.enabled);
    }

    #[test]
    fn test_args_override_plugin_dir() {
        let mut config = RuntimeConfig::default();
        config.apply_args(["--verbose", "build/plugins", "ignored"]);
        assert_eq!(config.plugin_dir, PathBuf::from("build/plugins"));

        let mut untouched = RuntimeConfig::default();
        untouched.apply_args(Vec::<String>::new());
        assert_eq!(untouched.plugin_dir, PathBuf::from("."));
    }
}
