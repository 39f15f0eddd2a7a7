use crate::cli::{Cli, RenderTarget};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub transform: TransformConfig,
    pub render: RenderConfig,
    pub workspace: WorkspaceConfig,
}

/// Where documents and schemas live
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    /// Holds `<name>.xsd`
    pub schema_dir: PathBuf,
}

/// XSLT processor invocation and stylesheet locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransformConfig {
    pub program: String,
    pub base_args: Vec<String>,
    /// Stylesheet paths below are relative to this directory
    pub stylesheet_dir: PathBuf,
    pub dashboard_stylesheet: PathBuf,
    pub feedback_stylesheet: PathBuf,
    pub report_stylesheet: PathBuf,
    pub timeout_seconds: u64,
    /// Cap on captured tool output and rendered payloads, in megabytes
    pub max_output_mb: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RenderBackendKind {
    Local,
    Remote,
}

impl From<RenderTarget> for RenderBackendKind {
    fn from(target: RenderTarget) -> Self {
        match target {
            RenderTarget::Local => RenderBackendKind::Local,
            RenderTarget::Remote => RenderBackendKind::Remote,
        }
    }
}

/// PDF rendering
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    pub backend: RenderBackendKind,
    pub remote_url: String,
    pub program: String,
    /// `{input}` and `{output}` are substituted per run
    pub args: Vec<String>,
    pub timeout_seconds: u64,
}

/// Scratch workspaces
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub scratch_dir: PathBuf,
    pub prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            schema_dir: PathBuf::from("schema"),
        }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            program: "java".to_string(),
            base_args: vec!["-jar".to_string(), "tools/saxon-he.jar".to_string()],
            stylesheet_dir: PathBuf::from("."),
            dashboard_stylesheet: PathBuf::from("dashboard.xsl"),
            feedback_stylesheet: PathBuf::from("xslt/views/feedback.xsl"),
            report_stylesheet: PathBuf::from("xslt/report.xsl"),
            timeout_seconds: 60,
            max_output_mb: 50,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            backend: RenderBackendKind::Remote,
            remote_url: "https://fop.xml.hslu-edu.ch/fop.php".to_string(),
            program: "fop".to_string(),
            args: ["-fo", "{input}", "-pdf", "{output}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            timeout_seconds: 60,
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir().join("xmlpress"),
            prefix: "xmlpress".to_string(),
        }
    }
}

impl TransformConfig {
    pub fn stylesheet(&self, relative: &Path) -> PathBuf {
        self.stylesheet_dir.join(relative)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn max_output_bytes(&self) -> usize {
        (self.max_output_mb as usize).saturating_mul(1024 * 1024)
    }
}

impl RenderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: defaults -> file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> Result<Config> {
        Self::load_config_with(&SystemEnvProvider, cli).await
    }

    pub async fn load_config_with(env: &impl EnvProvider, cli: &Cli) -> Result<Config> {
        let config = match &cli.config {
            Some(path) => Self::load_from_file(path).await?,
            None => Self::find_config_file().await?.unwrap_or_default(),
        };
        let config = Self::apply_environment_overrides_with(env, config)?;
        let config = Self::merge_with_cli(config, cli);
        Self::validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON). Missing keys keep their defaults.
    pub async fn load_from_file(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => match toml::from_str::<Config>(&content) {
                Ok(config) => Ok(config),
                Err(_) => Ok(serde_json::from_str(&content)?),
            },
        }
    }

    /// Find configuration file in standard locations
    pub async fn find_config_file() -> Result<Option<Config>> {
        let config_names = ["xmlpress.toml", "xmlpress.json"];

        for name in &config_names {
            let path = PathBuf::from(name);
            if path.exists() {
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join("xmlpress");
            for name in &config_names {
                let path = app_config_dir.join(name);
                if path.exists() {
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }

        Ok(None)
    }

    /// Apply `XMLPRESS_*` overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        if let Some(dir) = env.get("XMLPRESS_DATA_DIR") {
            config.store.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env.get("XMLPRESS_SCHEMA_DIR") {
            config.store.schema_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env.get("XMLPRESS_STYLESHEET_DIR") {
            config.transform.stylesheet_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env.get("XMLPRESS_SCRATCH_DIR") {
            config.workspace.scratch_dir = PathBuf::from(dir);
        }

        if let Some(program) = env.get("XMLPRESS_TRANSFORM_PROGRAM") {
            config.transform.program = program;
        }
        if let Some(timeout) = env.get("XMLPRESS_TRANSFORM_TIMEOUT") {
            config.transform.timeout_seconds =
                parse_number("XMLPRESS_TRANSFORM_TIMEOUT", &timeout)?;
        }
        if let Some(cap) = env.get("XMLPRESS_MAX_OUTPUT_MB") {
            config.transform.max_output_mb = parse_number("XMLPRESS_MAX_OUTPUT_MB", &cap)?;
        }

        if let Some(backend) = env.get("XMLPRESS_RENDER_BACKEND") {
            config.render.backend = match backend.to_lowercase().as_str() {
                "local" => RenderBackendKind::Local,
                "remote" => RenderBackendKind::Remote,
                _ => {
                    return Err(ConfigError::Environment(format!(
                        "Invalid XMLPRESS_RENDER_BACKEND value: {}",
                        backend
                    )));
                }
            };
        }
        if let Some(url) = env.get("XMLPRESS_RENDER_URL") {
            config.render.remote_url = url;
        }
        if let Some(program) = env.get("XMLPRESS_RENDER_PROGRAM") {
            config.render.program = program;
        }
        if let Some(timeout) = env.get("XMLPRESS_RENDER_TIMEOUT") {
            config.render.timeout_seconds = parse_number("XMLPRESS_RENDER_TIMEOUT", &timeout)?;
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence)
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Config {
        if let Some(dir) = &cli.data_dir {
            config.store.data_dir = dir.clone();
        }
        if let Some(dir) = &cli.schema_dir {
            config.store.schema_dir = dir.clone();
        }
        if let Some(dir) = &cli.stylesheet_dir {
            config.transform.stylesheet_dir = dir.clone();
        }
        if let Some(dir) = &cli.scratch_dir {
            config.workspace.scratch_dir = dir.clone();
        }
        if let Some(backend) = cli.backend {
            config.render.backend = backend.into();
        }
        if let Some(url) = &cli.render_url {
            config.render.remote_url = url.clone();
        }
        config
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        if config.transform.timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "Transform timeout must be greater than 0".to_string(),
            ));
        }
        if config.render.timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "Render timeout must be greater than 0".to_string(),
            ));
        }
        if config.transform.max_output_mb == 0 {
            return Err(ConfigError::Validation(
                "Output cap must be greater than 0".to_string(),
            ));
        }
        if config.transform.program.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Transform program must not be empty".to_string(),
            ));
        }
        if config.workspace.prefix.is_empty()
            || config.workspace.prefix.contains(['/', '\\'])
        {
            return Err(ConfigError::Validation(format!(
                "Invalid workspace prefix: {:?}",
                config.workspace.prefix
            )));
        }

        match config.render.backend {
            RenderBackendKind::Local if config.render.program.trim().is_empty() => {
                Err(ConfigError::Validation(
                    "Render program must not be empty".to_string(),
                ))
            }
            RenderBackendKind::Remote
                if !(config.render.remote_url.starts_with("http://")
                    || config.render.remote_url.starts_with("https://")) =>
            {
                Err(ConfigError::Validation(format!(
                    "Render URL must be http(s): {}",
                    config.render.remote_url
                )))
            }
            _ => Ok(()),
        }
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Environment(format!("Invalid {} value: {}", key, value)))
}
