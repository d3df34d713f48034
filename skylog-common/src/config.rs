//! Configuration loading and resolution
//!
//! Every setting is resolved in this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`SKYLOG_*`)
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing TOML file never terminates startup: a warning is logged and the
//! compiled defaults apply. A file that exists but does not parse is a
//! configuration error.

use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file
pub const ENV_CONFIG: &str = "SKYLOG_CONFIG";
pub const ENV_LOG_LEVEL: &str = "SKYLOG_LOG_LEVEL";
pub const ENV_RECORD_API: &str = "SKYLOG_RECORD_API";
pub const ENV_REGISTRY_API: &str = "SKYLOG_REGISTRY_API";
pub const ENV_LOCAL_DB: &str = "SKYLOG_LOCAL_DB";

const DEFAULT_SERVICE_URL: &str = "http://127.0.0.1:8080/api";
const DEFAULT_TIMEOUT_SECS: u64 = 15;
const DEFAULT_DEBOUNCE_MS: u64 = 300;
const DEFAULT_MIN_PREFIX: usize = 2;
const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Raw contents of `config.toml`
///
/// Every key is optional; absent keys fall through to the compiled defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub log_level: Option<String>,
    pub record_api_url: Option<String>,
    pub registry_api_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub local_db_path: Option<PathBuf>,
    pub search: SearchToml,
    /// Per-form overrides keyed by form name (e.g. `aircraft_identity`)
    pub forms: HashMap<String, FormToml>,
}

/// `[search]` table
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchToml {
    pub debounce_ms: Option<u64>,
    pub min_prefix: Option<usize>,
    pub limit: Option<usize>,
}

/// `[forms.<name>]` table
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FormToml {
    /// Fields populated by (and protected against) registry lookups.
    /// `None` keeps the form's built-in set.
    pub lookup_fields: Option<Vec<String>>,
}

impl TomlConfig {
    /// Parse a TOML document
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Read and parse a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }
}

/// Values supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub log_level: Option<String>,
    pub record_api_url: Option<String>,
    pub registry_api_url: Option<String>,
    pub local_db_path: Option<PathBuf>,
}

/// Debounced prefix search settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSettings {
    pub debounce: Duration,
    pub min_prefix: usize,
    pub limit: usize,
}

/// Fully resolved settings
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub log_level: String,
    pub record_api_url: String,
    pub registry_api_url: String,
    pub request_timeout: Duration,
    pub local_db_path: PathBuf,
    pub search: SearchSettings,
    pub forms: HashMap<String, FormToml>,
}

/// Compiled defaults for the current platform
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub log_level: String,
    pub service_url: String,
    pub local_db_path: PathBuf,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            log_level: "info".to_string(),
            service_url: DEFAULT_SERVICE_URL.to_string(),
            local_db_path: default_data_dir().join("local.db"),
        }
    }
}

impl Settings {
    /// Resolve settings from CLI overrides, environment, TOML file and defaults
    pub fn resolve(cli: &CliOverrides) -> Result<Self> {
        let toml = match locate_config_file(cli) {
            Some(path) if path.exists() => {
                info!("Loading configuration from {}", path.display());
                TomlConfig::load(&path)?
            }
            Some(path) => {
                warn!(
                    "Config file {} not found, using defaults",
                    path.display()
                );
                TomlConfig::default()
            }
            None => {
                debug!("No config file found, using defaults");
                TomlConfig::default()
            }
        };

        Ok(Self::from_sources(cli, &toml))
    }

    /// Merge already-loaded sources; environment variables are read here
    pub fn from_sources(cli: &CliOverrides, toml: &TomlConfig) -> Self {
        let defaults = CompiledDefaults::for_current_platform();

        let log_level = pick(
            cli.log_level.clone(),
            ENV_LOG_LEVEL,
            toml.log_level.clone(),
            defaults.log_level,
        );
        let record_api_url = pick(
            cli.record_api_url.clone(),
            ENV_RECORD_API,
            toml.record_api_url.clone(),
            defaults.service_url.clone(),
        );
        let registry_api_url = pick(
            cli.registry_api_url.clone(),
            ENV_REGISTRY_API,
            toml.registry_api_url.clone(),
            defaults.service_url,
        );
        let local_db_path = cli
            .local_db_path
            .clone()
            .or_else(|| env_value(ENV_LOCAL_DB).map(PathBuf::from))
            .or_else(|| toml.local_db_path.clone())
            .unwrap_or(defaults.local_db_path);

        Self {
            log_level,
            record_api_url: trim_trailing_slash(record_api_url),
            registry_api_url: trim_trailing_slash(registry_api_url),
            request_timeout: Duration::from_secs(
                toml.request_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
            local_db_path,
            search: SearchSettings {
                debounce: Duration::from_millis(
                    toml.search.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS),
                ),
                min_prefix: toml.search.min_prefix.unwrap_or(DEFAULT_MIN_PREFIX),
                limit: toml.search.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).max(1),
            },
            forms: toml.forms.clone(),
        }
    }

    /// Configured lookup-field set for a form, if overridden
    pub fn lookup_fields(&self, form: &str) -> Option<&[String]> {
        self.forms
            .get(form)
            .and_then(|f| f.lookup_fields.as_deref())
    }
}

fn pick(cli: Option<String>, env_name: &str, toml: Option<String>, default: String) -> String {
    cli.or_else(|| env_value(env_name))
        .or(toml)
        .unwrap_or(default)
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn trim_trailing_slash(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

/// Config file location: `--config` > `SKYLOG_CONFIG` > platform config dir
fn locate_config_file(cli: &CliOverrides) -> Option<PathBuf> {
    if let Some(path) = &cli.config_path {
        return Some(path.clone());
    }
    if let Some(path) = env_value(ENV_CONFIG) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir()
        .map(|d| d.join("skylog").join("config.toml"))
        .filter(|p| p.exists())
}

/// OS-dependent data directory for device-local state
fn default_data_dir() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/skylog
        dirs::data_local_dir()
            .map(|d| d.join("skylog"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/skylog"))
    } else if cfg!(target_os = "macos") {
        // ~/Library/Application Support/skylog
        dirs::data_dir()
            .map(|d| d.join("skylog"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/skylog"))
    } else if cfg!(target_os = "windows") {
        // %LOCALAPPDATA%\skylog
        dirs::data_local_dir()
            .map(|d| d.join("skylog"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\skylog"))
    } else {
        PathBuf::from("./skylog_data")
    }
}
