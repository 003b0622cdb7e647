use serde::Deserialize;
use std::{fs, path::PathBuf};

pub const DEFAULT_PROMETHEUS_URL: &str = "http://192.168.87.108:9090";
pub const DEFAULT_PORT: u16 = 48080;
pub const DEFAULT_SECRET_FILE: &str = "api_key.secret";
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid value for {name}: '{value}'")]
    InvalidValue { name: &'static str, value: String },
}

/// Accepts both `secure_api_with_key = true` and the env-style `"True"`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum SecureFlag {
    Bool(bool),
    Text(String),
}

impl SecureFlag {
    pub fn enabled(&self) -> bool {
        match self {
            SecureFlag::Bool(b) => *b,
            SecureFlag::Text(s) => s == "True",
        }
    }
}

/// Optional on-disk configuration. Every field can be overridden by the
/// matching `PROM_PROXY_*` environment variable.
#[derive(Debug, Deserialize, Default)]
pub struct FileConfig {
    pub prometheus_url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    // A bool, or a string where only the literal "True" turns the gate on
    pub secure_api_with_key: Option<SecureFlag>,
    pub api_key: Option<String>,
    pub secret_file: Option<PathBuf>,
    // Per-request timeout for upstream queries. Defaults to 5 seconds.
    pub timeout_secs: Option<u64>,
    // Connection timeout for the upstream server.
    // If not set, uses reqwest's default behavior.
    pub connect_timeout_secs: Option<u64>,
}

impl FileConfig {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let cfg_str = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        toml::from_str(&cfg_str).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub prometheus_url: String,
    pub host: String,
    pub port: u16,
    pub secure_api_with_key: bool,
    pub api_key_override: Option<String>,
    pub secret_file: PathBuf,
    pub timeout_secs: u64,
    pub connect_timeout_secs: Option<u64>,
}

impl Config {
    /// Loads `PROM_PROXY_CONFIG` (when set) and applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match env_var("PROM_PROXY_CONFIG") {
            Some(path) => FileConfig::from_file(&path)?,
            None => FileConfig::default(),
        };
        Self::resolve(file, env_var)
    }

    pub fn resolve(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let lookup = |name: &str| env(name).filter(|v| !v.is_empty());

        let prometheus_url = lookup("PROM_PROXY_SERVER_URL")
            .or(file.prometheus_url)
            .unwrap_or_else(|| DEFAULT_PROMETHEUS_URL.into());
        let host = lookup("PROM_PROXY_LISTEN_HOST")
            .or(file.host)
            .unwrap_or_else(|| "0.0.0.0".into());
        let port = match lookup("PROM_PROXY_SERVER_PORT") {
            Some(v) => parse_value("PROM_PROXY_SERVER_PORT", v)?,
            None => file.port.unwrap_or(DEFAULT_PORT),
        };
        let secure_api_with_key = lookup("PROM_PROXY_SECURE_API_WITH_KEY")
            .map(SecureFlag::Text)
            .or(file.secure_api_with_key)
            .map(|flag| flag.enabled())
            .unwrap_or(false);
        let api_key_override = lookup("PROM_PROXY_SECURE_API_KEY")
            .or(file.api_key)
            .filter(|v| !v.is_empty());
        let secret_file = lookup("PROM_PROXY_SECRET_FILE")
            .map(PathBuf::from)
            .or(file.secret_file)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SECRET_FILE));
        let timeout_secs = match lookup("PROM_PROXY_TIMEOUT_SECS") {
            Some(v) => parse_value("PROM_PROXY_TIMEOUT_SECS", v)?,
            None => file.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
        };
        let connect_timeout_secs = match lookup("PROM_PROXY_CONNECT_TIMEOUT_SECS") {
            Some(v) => Some(parse_value("PROM_PROXY_CONNECT_TIMEOUT_SECS", v)?),
            None => file.connect_timeout_secs,
        };

        Ok(Config {
            prometheus_url,
            host,
            port,
            secure_api_with_key,
            api_key_override,
            secret_file,
            timeout_secs,
            connect_timeout_secs,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_value<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidValue { name, value })
}
