//! Provisioner configuration.
//!
//! Configuration is read from a TOML file. Every field has a default so an
//! empty file (or no file at all) yields a working setup for the stock
//! layout: units in `/etc/systemd/system`, apps under `/home/<name>`, a
//! `venv` next to the code and Gunicorn listening on `5000 + N`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Standard configuration file locations (in search order)
pub const STANDARD_CONFIG_LOCATIONS: &[&str] = &["/etc/gantry/gantry.toml"];

/// Environment variable pointing at a configuration file
pub const CONFIG_ENV: &str = "GANTRY_CONFIG";

/// Main configuration for the provisioner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Directory holding the generated unit files
    pub unit_dir: PathBuf,
    /// Unit name prefix, the identifier is appended to it
    pub unit_prefix: String,
    /// Unit file suffix
    pub unit_suffix: String,
    /// Port of identifier 0
    pub base_port: u16,
    /// Directory holding the allocator lock and counter
    pub state_dir: PathBuf,
    /// Parent of the per-application script directories
    pub home_root: PathBuf,
    /// File name of the update script
    pub script_name: String,
    /// Sentinel file whose presence marks a pending update
    pub sentinel: String,
    /// Unit template
    pub template: TemplateConfig,
    /// External commands
    pub commands: CommandConfig,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            unit_dir: PathBuf::from("/etc/systemd/system"),
            unit_prefix: "flask_app".to_string(),
            unit_suffix: ".service".to_string(),
            base_port: 5000,
            state_dir: PathBuf::from("/var/lib/gantry"),
            home_root: PathBuf::from("/home"),
            script_name: "pull.sh".to_string(),
            sentinel: ".update".to_string(),
            template: TemplateConfig::default(),
            commands: CommandConfig::default(),
        }
    }
}

/// Settings rendered into every unit descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Virtualenv directory, relative to the working directory
    pub venv_dir: String,
    /// Server executable inside `<venv>/bin`
    pub server: String,
    /// WSGI application module
    pub app_module: String,
    /// Address Gunicorn binds to
    pub bind_host: String,
    /// Number of Gunicorn workers
    pub workers: u32,
    /// systemd `Restart=` policy
    pub restart: String,
    /// systemd `WantedBy=` target
    pub wanted_by: String,
    /// Optional `User=`
    pub user: Option<String>,
    /// Optional `Group=`
    pub group: Option<String>,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            venv_dir: "venv".to_string(),
            server: "gunicorn".to_string(),
            app_module: "app:app".to_string(),
            bind_host: "0.0.0.0".to_string(),
            workers: 3,
            restart: "always".to_string(),
            wanted_by: "multi-user.target".to_string(),
            user: None,
            group: None,
        }
    }
}

/// External tool invocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Path or name of `systemctl`
    pub systemctl: PathBuf,
    /// Path or name of `git`
    pub git: PathBuf,
    /// Upper bound for any single external command, in seconds
    pub timeout_secs: u64,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            systemctl: PathBuf::from("systemctl"),
            git: PathBuf::from("git"),
            timeout_secs: 120,
        }
    }
}

impl CommandConfig {
    /// Timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ProvisionConfig {
    /// Load configuration from the first location that exists, falling back
    /// to defaults.
    ///
    /// Search order:
    /// 1. User-specified path (must exist)
    /// 2. `GANTRY_CONFIG` environment variable (must exist)
    /// 3. `/etc/gantry/gantry.toml`
    pub fn load(custom_path: Option<&Path>) -> Result<Self> {
        match detect_config_path(custom_path)? {
            Some(path) => Self::load_from(&path),
            None => {
                debug!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Save configuration to a path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings that would produce unusable artifacts.
    pub fn validate(&self) -> Result<()> {
        if self.unit_prefix.is_empty() {
            return Err(Error::Config("unit_prefix must not be empty".to_string()));
        }
        if self.unit_prefix.chars().any(|c| c.is_ascii_digit()) {
            return Err(Error::Config(format!(
                "unit_prefix must not contain digits: {}",
                self.unit_prefix
            )));
        }
        if !self.unit_suffix.starts_with('.') {
            return Err(Error::Config(format!(
                "unit_suffix must start with '.': {}",
                self.unit_suffix
            )));
        }
        if self.script_name.is_empty() || self.script_name.contains('/') {
            return Err(Error::Config(format!(
                "script_name must be a plain file name: {}",
                self.script_name
            )));
        }
        if self.sentinel.is_empty() || self.sentinel.contains('/') {
            return Err(Error::Config(format!(
                "sentinel must be a plain file name: {}",
                self.sentinel
            )));
        }
        if self.template.workers == 0 {
            return Err(Error::Config("template.workers must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Unit name for an identifier, e.g. `flask_app7`.
    pub fn unit_name(&self, identifier: u32) -> String {
        format!("{}{}", self.unit_prefix, identifier)
    }

    /// Unit file name for an identifier, e.g. `flask_app7.service`.
    pub fn unit_file_name(&self, identifier: u32) -> String {
        format!("{}{}", self.unit_name(identifier), self.unit_suffix)
    }

    /// Full path of the unit file for an identifier.
    pub fn unit_path(&self, identifier: u32) -> PathBuf {
        self.unit_dir.join(self.unit_file_name(identifier))
    }

    /// Default update script location for a working directory:
    /// `<home_root>/<basename(working_dir)>/<script_name>`.
    pub fn script_path(&self, working_dir: &Path) -> Result<PathBuf> {
        let name = working_dir.file_name().ok_or_else(|| {
            Error::Config(format!(
                "Working directory has no final component: {}",
                working_dir.display()
            ))
        })?;
        Ok(self.home_root.join(name).join(&self.script_name))
    }
}

/// Find the configuration file to use, if any.
pub fn detect_config_path(custom_path: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = custom_path {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        return Ok(Some(path.to_path_buf()));
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(env_path);
        if !path.exists() {
            return Err(Error::Config(format!(
                "{} points to a missing file: {}",
                CONFIG_ENV,
                path.display()
            )));
        }
        return Ok(Some(path));
    }

    Ok(STANDARD_CONFIG_LOCATIONS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists()))
}
