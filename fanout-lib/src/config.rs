//! Configuration file parsing and management.
//!
//! This module loads TOML configuration files, merges them with proper
//! precedence, reads `FANOUT_*` environment variables and applies both on
//! top of a [`DispatchConfig`].

use crate::error::FanoutError;
use crate::types::{DispatchConfig, Method, MAX_CONCURRENCY};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration loaded from TOML files.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FileConfig {
    /// Default values for dispatch and CLI options
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaults: Option<DefaultsConfig>,

    /// Headers sent with every request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
}

/// The `[defaults]` table.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DefaultsConfig {
    /// Maximum in-flight requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,

    /// Per-attempt timeout (as string, e.g., "500ms", "5s", "2m")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Retries after a timeout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,

    /// Pause before a retry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub flatten: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub raise_for_status: Option<bool>,

    /// HTTP method name, case-insensitive
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Prefix for relative paths
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl FileConfig {
    /// Layer this file's values over `config`.
    pub fn apply_to(&self, mut config: DispatchConfig) -> Result<DispatchConfig, FanoutError> {
        if let Some(defaults) = &self.defaults {
            if let Some(concurrency) = defaults.concurrency {
                config.max_concurrency = concurrency;
            }
            if let Some(timeout) = &defaults.timeout {
                config.timeout = require_duration("timeout", timeout)?;
            }
            if let Some(retries) = defaults.retries {
                config.max_retries_on_timeout = retries;
            }
            if let Some(delay) = &defaults.retry_delay {
                config.retry_delay = require_duration("retry_delay", delay)?;
            }
            if let Some(flatten) = defaults.flatten {
                config.flatten = flatten;
            }
            if let Some(raise) = defaults.raise_for_status {
                config.raise_for_status = raise;
            }
        }

        if let Some(headers) = &self.headers {
            config
                .headers
                .extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        Ok(config)
    }

    /// Configured method, if any.
    pub fn method(&self) -> Result<Option<Method>, FanoutError> {
        self.defaults
            .as_ref()
            .and_then(|d| d.method.as_deref())
            .map(str::parse)
            .transpose()
    }

    pub fn base_url(&self) -> Option<&str> {
        self.defaults.as_ref().and_then(|d| d.base_url.as_deref())
    }
}

/// Configuration discovery and loading functionality.
#[derive(Debug, Clone, Default)]
pub struct ConfigManager;

impl ConfigManager {
    pub fn new() -> Self {
        Self
    }

    /// Load and validate a configuration file.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<FileConfig, FanoutError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(FanoutError::file_error(
                path.to_string_lossy(),
                "Configuration file not found",
            ));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            FanoutError::file_error(
                path.to_string_lossy(),
                format!("Failed to read configuration file: {}", e),
            )
        })?;

        let config: FileConfig = toml::from_str(&content).map_err(|e| {
            FanoutError::config(format!("Failed to parse TOML configuration: {}", e))
        })?;

        self.validate_config(&config)?;

        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Discover and load configuration files in precedence order.
    ///
    /// XDG config, then the home directory, then the working directory.
    /// Later files override earlier ones. Files that fail to load are
    /// skipped with a warning.
    pub fn discover_and_load(&self) -> Result<FileConfig, FanoutError> {
        let candidates = [
            self.get_xdg_config_path(),
            self.get_global_config_path(),
            self.get_local_config_path(),
        ];

        let mut merged = FileConfig::default();
        let mut loaded = Vec::new();

        for path in candidates.into_iter().flatten() {
            match self.load_file(&path) {
                Ok(config) => {
                    merged = self.merge_configs(merged, config);
                    loaded.push(path);
                }
                Err(e) => warn!("Ignoring config file {}: {}", path.display(), e),
            }
        }

        if loaded.len() > 1 {
            debug!(
                "Merged {} config files, highest precedence: {}",
                loaded.len(),
                loaded[loaded.len() - 1].display()
            );
        }

        Ok(merged)
    }

    fn get_local_config_path(&self) -> Option<PathBuf> {
        ["./fanout.toml", "./.fanout.toml"]
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    fn get_global_config_path(&self) -> Option<PathBuf> {
        let home = env::var_os("HOME")?;
        [".fanout.toml", "fanout.toml"]
            .iter()
            .map(|name| Path::new(&home).join(name))
            .find(|path| path.exists())
    }

    /// `$XDG_CONFIG_HOME/fanout/config.toml`, falling back to `~/.config`.
    fn get_xdg_config_path(&self) -> Option<PathBuf> {
        let config_dir = env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|home| Path::new(&home).join(".config")))?;

        let path = config_dir.join("fanout").join("config.toml");
        path.exists().then_some(path)
    }

    /// Values from `higher` take precedence over values from `lower`.
    pub fn merge_configs(&self, lower: FileConfig, higher: FileConfig) -> FileConfig {
        FileConfig {
            defaults: match (lower.defaults, higher.defaults) {
                (Some(lower), Some(higher)) => Some(DefaultsConfig {
                    concurrency: higher.concurrency.or(lower.concurrency),
                    timeout: higher.timeout.or(lower.timeout),
                    retries: higher.retries.or(lower.retries),
                    retry_delay: higher.retry_delay.or(lower.retry_delay),
                    flatten: higher.flatten.or(lower.flatten),
                    raise_for_status: higher.raise_for_status.or(lower.raise_for_status),
                    method: higher.method.or(lower.method),
                    base_url: higher.base_url.or(lower.base_url),
                }),
                (lower, higher) => higher.or(lower),
            },
            headers: match (lower.headers, higher.headers) {
                (Some(mut lower), Some(higher)) => {
                    lower.extend(higher);
                    Some(lower)
                }
                (lower, higher) => higher.or(lower),
            },
        }
    }

    fn validate_config(&self, config: &FileConfig) -> Result<(), FanoutError> {
        if let Some(defaults) = &config.defaults {
            if let Some(concurrency) = defaults.concurrency {
                if concurrency == 0 || concurrency > MAX_CONCURRENCY {
                    return Err(FanoutError::config(format!(
                        "Concurrency must be between 1 and {}",
                        MAX_CONCURRENCY
                    )));
                }
            }

            if let Some(timeout) = &defaults.timeout {
                require_duration("timeout", timeout)?;
            }

            if let Some(delay) = &defaults.retry_delay {
                require_duration("retry_delay", delay)?;
            }

            if let Some(method) = &defaults.method {
                method.parse::<Method>()?;
            }

            if let Some(base_url) = &defaults.base_url {
                url::Url::parse(base_url)
                    .map_err(|e| FanoutError::invalid_url(base_url, e.to_string()))?;
            }
        }

        if let Some(headers) = &config.headers {
            if headers.keys().any(|name| name.trim().is_empty()) {
                return Err(FanoutError::config("Header names cannot be empty"));
            }
        }

        Ok(())
    }
}

/// Environment variable configuration that mirrors CLI options.
///
/// Populated from `FANOUT_*` variables by [`load_env_config`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvConfig {
    pub concurrency: Option<usize>,
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub flatten: Option<bool>,
    pub raise_for_status: Option<bool>,
    pub base_url: Option<String>,
    pub method: Option<Method>,
    pub config: Option<String>,
}

/// Load configuration from `FANOUT_*` environment variables.
///
/// Invalid values are logged as warnings and ignored.
pub fn load_env_config() -> EnvConfig {
    EnvConfig::from_lookup(|name| env::var(name).ok())
}

impl EnvConfig {
    /// Build from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut env_config = EnvConfig::default();

        if let Some(val) = lookup("FANOUT_CONCURRENCY") {
            match val.trim().parse::<usize>() {
                Ok(n) if (1..=MAX_CONCURRENCY).contains(&n) => {
                    debug!("Using FANOUT_CONCURRENCY={}", n);
                    env_config.concurrency = Some(n);
                }
                _ => warn!(
                    "Invalid FANOUT_CONCURRENCY='{}', must be 1-{}",
                    val, MAX_CONCURRENCY
                ),
            }
        }

        env_config.timeout = env_duration(&lookup, "FANOUT_TIMEOUT").filter(|t| {
            let valid = !t.is_zero();
            if !valid {
                warn!("Invalid FANOUT_TIMEOUT, must be greater than zero");
            }
            valid
        });
        env_config.retry_delay = env_duration(&lookup, "FANOUT_RETRY_DELAY");

        if let Some(val) = lookup("FANOUT_RETRIES") {
            match val.trim().parse::<u32>() {
                Ok(n) => {
                    debug!("Using FANOUT_RETRIES={}", n);
                    env_config.retries = Some(n);
                }
                Err(_) => warn!("Invalid FANOUT_RETRIES='{}', must be a number", val),
            }
        }

        env_config.flatten = env_bool(&lookup, "FANOUT_FLATTEN");
        env_config.raise_for_status = env_bool(&lookup, "FANOUT_RAISE_FOR_STATUS");

        if let Some(val) = lookup("FANOUT_METHOD") {
            match val.parse::<Method>() {
                Ok(method) => {
                    debug!("Using FANOUT_METHOD={}", method);
                    env_config.method = Some(method);
                }
                Err(e) => warn!("Invalid FANOUT_METHOD: {}", e),
            }
        }

        env_config.base_url = env_string(&lookup, "FANOUT_BASE_URL");
        env_config.config = env_string(&lookup, "FANOUT_CONFIG");

        env_config
    }

    /// Layer the environment values over `config`.
    pub fn apply_to(&self, mut config: DispatchConfig) -> DispatchConfig {
        if let Some(concurrency) = self.concurrency {
            config.max_concurrency = concurrency;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        if let Some(retries) = self.retries {
            config.max_retries_on_timeout = retries;
        }
        if let Some(delay) = self.retry_delay {
            config.retry_delay = delay;
        }
        if let Some(flatten) = self.flatten {
            config.flatten = flatten;
        }
        if let Some(raise) = self.raise_for_status {
            config.raise_for_status = raise;
        }
        config
    }
}

fn env_string<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).filter(|val| !val.trim().is_empty()).map(|val| {
        debug!("Using {}={}", name, val);
        val
    })
}

fn env_bool<F>(lookup: &F, name: &str) -> Option<bool>
where
    F: Fn(&str) -> Option<String>,
{
    let val = lookup(name)?;
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => {
            warn!("Invalid {}='{}', use true/false", name, val);
            None
        }
    }
}

fn env_duration<F>(lookup: &F, name: &str) -> Option<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let val = lookup(name)?;
    let parsed = parse_duration(&val);
    if parsed.is_none() {
        warn!(
            "Invalid {}='{}', use format like '500ms', '5s', '2m'",
            name, val
        );
    }
    parsed
}

fn require_duration(field: &str, value: &str) -> Result<Duration, FanoutError> {
    parse_duration(value).ok_or_else(|| {
        FanoutError::config(format!(
            "Invalid {} format '{}'. Use format like '500ms', '5s', '2m'",
            field, value
        ))
    })
}

/// Parse a duration like "500ms", "5s", "1.5s", "2m" or bare seconds.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim().to_lowercase();

    if let Some(ms) = value.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = value.strip_suffix('s') {
        secs_f64(secs)
    } else if let Some(mins) = value.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        // Assume seconds if no unit
        secs_f64(&value)
    }
}

fn secs_f64(value: &str) -> Option<Duration> {
    let secs = value.trim().parse::<f64>().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}
