//! Bootstrap configuration loading and root folder resolution
//!
//! Settings sources, highest priority first:
//! 1. Command-line arguments
//! 2. Environment variables (`VOXFAB_ROOT_FOLDER`)
//! 3. TOML configuration file
//! 4. Compiled defaults
//!
//! A missing TOML file is not an error: the service logs a warning and starts
//! with compiled defaults. A file that exists but cannot be parsed is.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable consulted for the root folder
pub const ROOT_FOLDER_ENV: &str = "VOXFAB_ROOT_FOLDER";

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 5000;

/// Default voice worker URL
pub const DEFAULT_BRIDGE_URL: &str = "http://127.0.0.1:5010";

/// Bootstrap configuration loaded from TOML
///
/// Cannot change while running; the service must restart to pick up edits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding models, working audio and kept takes
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Address the HTTP server binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Base URL of the voice worker hosting inference and DSP
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,

    /// Model cache limits
    #[serde(default)]
    pub cache: CacheConfig,

    /// Upper bounds for collaborator calls
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            bind_address: default_bind_address(),
            port: default_port(),
            bridge_url: default_bridge_url(),
            cache: CacheConfig::default(),
            timeouts: TimeoutConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Model cache limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of live cached models
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Seconds a cached model stays live after insertion
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Timeouts (seconds) for calls into external collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_model_load_secs")]
    pub model_load_secs: u64,
    #[serde(default = "default_synthesis_secs")]
    pub synthesis_secs: u64,
    #[serde(default = "default_transform_secs")]
    pub transform_secs: u64,
    #[serde(default = "default_dataset_secs")]
    pub dataset_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            model_load_secs: default_model_load_secs(),
            synthesis_secs: default_synthesis_secs(),
            transform_secs: default_transform_secs(),
            dataset_secs: default_dataset_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn model_load(&self) -> Duration {
        Duration::from_secs(self.model_load_secs)
    }

    pub fn synthesis(&self) -> Duration {
        Duration::from_secs(self.synthesis_secs)
    }

    pub fn transform(&self) -> Duration {
        Duration::from_secs(self.transform_secs)
    }

    pub fn dataset(&self) -> Duration {
        Duration::from_secs(self.dataset_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bridge_url() -> String {
    DEFAULT_BRIDGE_URL.to_string()
}

fn default_cache_capacity() -> usize {
    10
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_model_load_secs() -> u64 {
    600
}

fn default_synthesis_secs() -> u64 {
    300
}

fn default_transform_secs() -> u64 {
    120
}

fn default_dataset_secs() -> u64 {
    600
}

fn default_log_level() -> String {
    "info".to_string()
}

/// OS-dependent default root folder
///
/// `~/.local/share/voxfab` on Linux, the platform data dir elsewhere.
pub fn get_default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("voxfab"))
        .unwrap_or_else(|| PathBuf::from("./voxfab_data"))
}

/// Default per-module config file: `<config_dir>/voxfab/<module>.toml`
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("voxfab").join(format!("{module_name}.toml")))
}

/// Load the TOML bootstrap config
///
/// `None` path or a path that does not exist yields defaults with a warning.
pub fn load_toml_config(path: Option<&Path>) -> Result<TomlConfig> {
    let Some(path) = path else {
        warn!("No config file location available, using compiled defaults");
        return Ok(TomlConfig::default());
    };

    if !path.exists() {
        warn!(
            "Config file {} not found, using compiled defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;

    info!("Loaded TOML configuration from {}", path.display());
    Ok(config)
}

/// Root folder resolver
///
/// Priority: CLI argument > `VOXFAB_ROOT_FOLDER` > TOML `root_folder` > compiled default.
#[derive(Debug, Clone)]
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml_value: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            cli_arg: None,
            toml_value: None,
        }
    }

    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    pub fn with_toml(mut self, config: &TomlConfig) -> Self {
        self.toml_value = config.root_folder.clone();
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            info!("{}: root folder {} (command line)", self.module_name, path.display());
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                info!("{}: root folder {} ({})", self.module_name, path, ROOT_FOLDER_ENV);
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml_value {
            info!("{}: root folder {} (TOML)", self.module_name, path.display());
            return path.clone();
        }

        let path = get_default_root_folder();
        info!("{}: root folder {} (default)", self.module_name, path.display());
        path
    }
}

/// Directory layout under the root folder
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    /// Model folders, addressed by folder name
    pub fn models_dir(&self) -> PathBuf {
        self.root_folder.join("models")
    }

    /// Working audio: current, backup and cropped baseline
    pub fn work_dir(&self) -> PathBuf {
        self.root_folder.join("work")
    }

    /// Dataset working directory: kept takes and manifests
    pub fn kept_dir(&self) -> PathBuf {
        self.root_folder.join("kept")
    }

    /// Fixed upload location read by CSV validation
    pub fn upload_dir(&self) -> PathBuf {
        self.root_folder.join("extracted")
    }

    /// Create the root folder and every sub-directory the service writes to
    pub fn ensure_directory_exists(&self) -> Result<()> {
        for dir in [
            self.root_folder.clone(),
            self.models_dir(),
            self.work_dir(),
            self.kept_dir(),
            self.upload_dir(),
        ] {
            if !dir.exists() {
                std::fs::create_dir_all(&dir)?;
                info!("Created directory {}", dir.display());
            }
        }
        Ok(())
    }
}
