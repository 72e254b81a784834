//! Configuration resolution. Precedence, highest first: CLI flags, then
//! `CODEGATE_*` environment (clap handles both), then the YAML config file,
//! then built-in defaults.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use thiserror::Error;

use llm_client::provider::ProviderKind;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid port `{0}`: must be between 1 and 65535")]
    InvalidPort(u32),

    #[error("config file `{0}` could not be read: {1}")]
    UnreadableFile(PathBuf, std::io::Error),

    #[error("config file is not valid yaml: {0}")]
    MalformedYaml(#[from] serde_yaml::Error),

    #[error("unknown provider `{0}` in provider_urls")]
    UnknownProvider(String),

    #[error("provider url entry `{0}` must have the form kind=url")]
    MalformedProviderUrl(String),

    #[error("similarity floor {0} must be between 0 and 1")]
    InvalidSimilarityFloor(f32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warning => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "codegate", about = "A privacy-preserving gateway for AI coding assistants")]
struct CliArgs {
    /// Optional YAML config file
    #[arg(long, env = "CODEGATE_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "CODEGATE_PORT")]
    port: Option<u32>,

    #[arg(long, env = "CODEGATE_PROXY_PORT")]
    proxy_port: Option<u32>,

    #[arg(long, env = "CODEGATE_DASHBOARD_PORT")]
    dashboard_port: Option<u32>,

    #[arg(long, env = "CODEGATE_HOST")]
    host: Option<String>,

    #[arg(long, env = "CODEGATE_LOG_LEVEL", value_enum)]
    log_level: Option<LogLevel>,

    #[arg(long, env = "CODEGATE_LOG_FORMAT", value_enum)]
    log_format: Option<LogFormat>,

    /// Repeatable `kind=url` overrides for per-provider default base urls
    #[arg(long = "provider-url", value_name = "KIND=URL")]
    provider_urls: Vec<String>,

    /// The single persisted-state volume
    #[arg(long, env = "CODEGATE_VOLUME")]
    volume: Option<PathBuf>,

    #[arg(long, env = "CODEGATE_CERTS_DIR")]
    certs_dir: Option<PathBuf>,

    #[arg(long, env = "CODEGATE_CA_CERT")]
    ca_cert: Option<PathBuf>,

    #[arg(long, env = "CODEGATE_CA_KEY")]
    ca_key: Option<PathBuf>,

    #[arg(long, env = "CODEGATE_SERVER_CERT")]
    server_cert: Option<PathBuf>,

    #[arg(long, env = "CODEGATE_SERVER_KEY")]
    server_key: Option<PathBuf>,

    /// Path to a YAML mapping of named system prompts
    #[arg(long, env = "CODEGATE_PROMPTS")]
    prompts: Option<PathBuf>,

    #[arg(long, env = "CODEGATE_DB_PATH")]
    db_path: Option<PathBuf>,

    #[arg(long, env = "CODEGATE_VEC_DB_PATH")]
    vec_db_path: Option<PathBuf>,

    #[arg(long, env = "CODEGATE_MODEL_BASE_PATH")]
    model_base_path: Option<PathBuf>,

    /// Cosine scores under this floor count as "unknown package"
    #[arg(long, env = "CODEGATE_VEC_SIMILARITY_FLOOR")]
    vec_similarity_floor: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigOverlay {
    port: Option<u32>,
    proxy_port: Option<u32>,
    dashboard_port: Option<u32>,
    host: Option<String>,
    log_level: Option<LogLevel>,
    log_format: Option<LogFormat>,
    #[serde(default)]
    provider_urls: HashMap<String, String>,
    volume: Option<PathBuf>,
    certs_dir: Option<PathBuf>,
    ca_cert: Option<PathBuf>,
    ca_key: Option<PathBuf>,
    server_cert: Option<PathBuf>,
    server_key: Option<PathBuf>,
    prompts: Option<PathBuf>,
    db_path: Option<PathBuf>,
    vec_db_path: Option<PathBuf>,
    model_base_path: Option<PathBuf>,
    vec_similarity_floor: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct Configuration {
    pub port: u16,
    pub proxy_port: u16,
    pub dashboard_port: u16,
    pub host: String,
    pub log_level: LogLevel,
    pub log_format: LogFormat,
    pub provider_urls: HashMap<ProviderKind, String>,
    pub volume: PathBuf,
    pub certs_dir: PathBuf,
    pub ca_cert: PathBuf,
    pub ca_key: PathBuf,
    pub server_cert: Option<PathBuf>,
    pub server_key: Option<PathBuf>,
    pub prompts: Option<PathBuf>,
    pub db_path: PathBuf,
    pub vec_db_path: PathBuf,
    pub model_base_path: PathBuf,
    pub vec_similarity_floor: f32,
}

fn validate_port(port: u32) -> Result<u16, ConfigError> {
    if port == 0 || port > u16::MAX as u32 {
        return Err(ConfigError::InvalidPort(port));
    }
    Ok(port as u16)
}

fn parse_provider_urls(
    cli_pairs: &[String],
    overlay: &HashMap<String, String>,
) -> Result<HashMap<ProviderKind, String>, ConfigError> {
    let mut urls = HashMap::new();
    for (kind, url) in overlay {
        let kind = ProviderKind::from_route_prefix(kind)
            .ok_or_else(|| ConfigError::UnknownProvider(kind.clone()))?;
        urls.insert(kind, url.clone());
    }
    // CLI pairs override YAML entries
    for pair in cli_pairs {
        let (kind, url) = pair
            .split_once('=')
            .ok_or_else(|| ConfigError::MalformedProviderUrl(pair.clone()))?;
        let kind = ProviderKind::from_route_prefix(kind)
            .ok_or_else(|| ConfigError::UnknownProvider(kind.to_owned()))?;
        urls.insert(kind, url.to_owned());
    }
    Ok(urls)
}

impl Configuration {
    pub fn parse() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let overlay = match &cli.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|err| ConfigError::UnreadableFile(path.clone(), err))?;
                serde_yaml::from_str::<ConfigOverlay>(&raw)?
            }
            None => ConfigOverlay::default(),
        };
        Self::resolve(cli, overlay)
    }

    fn resolve(cli: CliArgs, overlay: ConfigOverlay) -> Result<Self, ConfigError> {
        let volume = cli
            .volume
            .or(overlay.volume)
            .unwrap_or_else(|| PathBuf::from("/app/codegate_volume"));
        let certs_dir = cli
            .certs_dir
            .or(overlay.certs_dir)
            .unwrap_or_else(|| volume.join("certs"));
        let vec_similarity_floor = cli
            .vec_similarity_floor
            .or(overlay.vec_similarity_floor)
            .unwrap_or(0.85);
        if !(0.0..=1.0).contains(&vec_similarity_floor) {
            return Err(ConfigError::InvalidSimilarityFloor(vec_similarity_floor));
        }
        Ok(Configuration {
            port: validate_port(cli.port.or(overlay.port).unwrap_or(8989))?,
            proxy_port: validate_port(cli.proxy_port.or(overlay.proxy_port).unwrap_or(8990))?,
            dashboard_port: validate_port(
                cli.dashboard_port.or(overlay.dashboard_port).unwrap_or(9090),
            )?,
            host: cli
                .host
                .or(overlay.host)
                .unwrap_or_else(|| "localhost".to_owned()),
            log_level: cli.log_level.or(overlay.log_level).unwrap_or(LogLevel::Info),
            log_format: cli
                .log_format
                .or(overlay.log_format)
                .unwrap_or(LogFormat::Text),
            provider_urls: parse_provider_urls(&cli.provider_urls, &overlay.provider_urls)?,
            ca_cert: cli
                .ca_cert
                .or(overlay.ca_cert)
                .unwrap_or_else(|| certs_dir.join("ca.crt")),
            ca_key: cli
                .ca_key
                .or(overlay.ca_key)
                .unwrap_or_else(|| certs_dir.join("ca.key")),
            server_cert: cli.server_cert.or(overlay.server_cert),
            server_key: cli.server_key.or(overlay.server_key),
            prompts: cli.prompts.or(overlay.prompts),
            db_path: cli
                .db_path
                .or(overlay.db_path)
                .unwrap_or_else(|| volume.join("db").join("codegate.db")),
            vec_db_path: cli
                .vec_db_path
                .or(overlay.vec_db_path)
                .unwrap_or_else(|| volume.join("vectordb.db")),
            model_base_path: cli
                .model_base_path
                .or(overlay.model_base_path)
                .unwrap_or_else(|| volume.join("models")),
            certs_dir,
            volume,
            vec_similarity_floor,
        })
    }

    /// The effective base url for a provider: configured override or the
    /// provider's well-known default.
    pub fn provider_base_url(&self, kind: ProviderKind) -> String {
        self.provider_urls
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| kind.default_base_url().to_owned())
    }

    /// Named system prompts, loaded from the configured YAML mapping.
    pub fn load_prompts(&self) -> Result<HashMap<String, String>, ConfigError> {
        let Some(path) = &self.prompts else {
            return Ok(HashMap::new());
        };
        let raw = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::UnreadableFile(path.clone(), err))?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    pub fn bind_addr(&self, port: u16) -> String {
        let host = if self.host == "localhost" {
            "127.0.0.1"
        } else {
            self.host.as_str()
        };
        format!("{}:{}", host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_volume() {
        let config = Configuration::resolve(
            CliArgs::parse_from(["codegate"]),
            ConfigOverlay::default(),
        )
        .expect("resolve");
        assert_eq!(config.port, 8989);
        assert_eq!(config.proxy_port, 8990);
        assert_eq!(config.dashboard_port, 9090);
        assert_eq!(config.host, "localhost");
        assert_eq!(
            config.db_path,
            PathBuf::from("/app/codegate_volume/db/codegate.db")
        );
        assert_eq!(
            config.ca_cert,
            PathBuf::from("/app/codegate_volume/certs/ca.crt")
        );
    }

    #[test]
    fn cli_beats_yaml() {
        let overlay: ConfigOverlay =
            serde_yaml::from_str("port: 1234\nhost: 0.0.0.0\n").expect("yaml");
        let config = Configuration::resolve(
            CliArgs::parse_from(["codegate", "--port", "5678"]),
            overlay,
        )
        .expect("resolve");
        assert_eq!(config.port, 5678);
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn invalid_port_is_a_config_error() {
        let overlay: ConfigOverlay = serde_yaml::from_str("port: 0\n").expect("yaml");
        assert!(matches!(
            Configuration::resolve(CliArgs::parse_from(["codegate"]), overlay),
            Err(ConfigError::InvalidPort(0))
        ));
    }

    #[test]
    fn provider_url_pairs_parse_and_validate() {
        let config = Configuration::resolve(
            CliArgs::parse_from([
                "codegate",
                "--provider-url",
                "ollama=http://10.0.0.5:11434",
            ]),
            ConfigOverlay::default(),
        )
        .expect("resolve");
        assert_eq!(
            config.provider_base_url(ProviderKind::Ollama),
            "http://10.0.0.5:11434"
        );
        assert_eq!(
            config.provider_base_url(ProviderKind::OpenAI),
            "https://api.openai.com/v1"
        );

        assert!(Configuration::resolve(
            CliArgs::parse_from(["codegate", "--provider-url", "nonsense"]),
            ConfigOverlay::default(),
        )
        .is_err());
    }

    #[test]
    fn unknown_yaml_key_is_rejected() {
        let overlay = serde_yaml::from_str::<ConfigOverlay>("prot: 8989\n");
        assert!(overlay.is_err());
    }
}
