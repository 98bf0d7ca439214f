//! Layered server configuration.
//!
//! Precedence, lowest to highest: built-in defaults, the TOML config file,
//! `VOXBRIDGE_*` environment variables (`__` separates nesting, e.g.
//! `VOXBRIDGE_SERVER__PORT=4000`), CLI flags applied by `main`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use log::info;
use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "voxbridge";

const ENV_PREFIX: &str = "VOXBRIDGE";

/// Effective application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub ui: UiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listen address for the HTTP/WebSocket surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3456
}

/// How to spawn the assistant subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Assistant CLI binary.
    #[serde(default = "default_agent_binary")]
    pub binary: PathBuf,

    /// Arguments placing the CLI in line-JSON streaming mode.
    #[serde(default = "default_agent_args")]
    pub args: Vec<String>,

    /// Working directory handed to the subprocess.
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    /// Extra environment on top of the inherited one.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary: default_agent_binary(),
            args: default_agent_args(),
            working_dir: default_working_dir(),
            env: HashMap::new(),
        }
    }
}

fn default_agent_binary() -> PathBuf {
    PathBuf::from("claude")
}

fn default_agent_args() -> Vec<String> {
    [
        "--print",
        "--verbose",
        "--input-format",
        "stream-json",
        "--output-format",
        "stream-json",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_working_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"))
}

/// Static asset serving for the browser UI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UiConfig {
    /// Directory of built UI assets. When unset, `dist/` is preferred and
    /// `public/` is the dev fallback.
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

impl UiConfig {
    pub fn resolve_static_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.static_dir {
            return dir.clone();
        }
        let dist = PathBuf::from("dist");
        if dist.is_dir() {
            dist
        } else {
            PathBuf::from("public")
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Default config file location: `$XDG_CONFIG_HOME/voxbridge/config.toml`.
pub fn default_config_file() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
        .join("config.toml")
}

/// Load configuration from the given file (optional) and the environment.
pub fn load(config_file: &Path) -> Result<AppConfig> {
    let built = Config::builder()
        .add_source(
            File::from(config_file)
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()
        .context("assembling configuration")?;

    built
        .try_deserialize()
        .context("invalid configuration")
}

/// Load configuration, writing a commented default file on first run.
pub fn load_or_init(config_file: &Path) -> Result<AppConfig> {
    if !config_file.exists() {
        write_default_config(config_file)?;
        info!("wrote default config to {}", config_file.display());
    }
    load(config_file)
}

fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = String::new();
    body.push_str("# Configuration for ");
    body.push_str(APP_NAME);
    body.push('\n');
    body.push_str("# File: ");
    body.push_str(&path.display().to_string());
    body.push_str("\n\n");
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}
