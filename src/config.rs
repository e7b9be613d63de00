use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::error::{AppError, Result};

const DEFAULT_DATA_ROOT: &str = "/opt/cast";
const DEFAULT_PORT: u16 = 49443;
const DEFAULT_FACTS_TTL_SECS: u64 = 60 * 10;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_MAX_CSR_BYTES: usize = 4096;

#[derive(Debug, Clone, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Agent settings. Every value has a default so a bare environment yields a
/// working agent rooted at `/opt/cast`.
#[derive(Debug, Clone, Serialize)]
pub struct AgentConfig {
    pub ip: IpAddr,
    pub port: u16,

    pub data_root: PathBuf,
    pub bundle_dir: PathBuf,
    pub app_dir: PathBuf,
    pub service_dir: PathBuf,
    pub service_dir_enabled: PathBuf,
    pub ca_dir: PathBuf,

    pub facts_ttl: Duration,
    /// Finished jobs older than this are dropped from the registry. `None`
    /// keeps every job for the lifetime of the process.
    pub job_retention: Option<Duration>,
    pub sweep_interval: Duration,

    pub max_csr_bytes: usize,
    pub certgen_days: u32,
    pub certgen_size: u32,
    pub openssl_binary: String,
    pub sv_binary: String,

    pub logging: LoggingConfig,
}

impl AgentConfig {
    /// Build the configuration for a given data root, with every other
    /// setting at its default.
    pub fn for_data_root(data_root: impl AsRef<Path>) -> Self {
        let data_root = data_root.as_ref().to_path_buf();

        Self {
            ip: IpAddr::from([0, 0, 0, 0]),
            port: DEFAULT_PORT,
            bundle_dir: data_root.join("bundles"),
            app_dir: data_root.join("applications"),
            service_dir: data_root.join("services"),
            service_dir_enabled: data_root.join("services-enabled"),
            ca_dir: data_root.join("ca"),
            data_root,
            facts_ttl: Duration::from_secs(DEFAULT_FACTS_TTL_SECS),
            job_retention: None,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            max_csr_bytes: DEFAULT_MAX_CSR_BYTES,
            certgen_days: 1825,
            certgen_size: 2048,
            openssl_binary: "openssl".to_string(),
            sv_binary: "sv".to_string(),
            logging: LoggingConfig::default(),
        }
    }

    /// Read the configuration from `CAST_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let data_root = std::env::var("CAST_DATA_ROOT").unwrap_or_else(|_| DEFAULT_DATA_ROOT.to_owned());
        let mut config = Self::for_data_root(data_root);

        config.ip = env_parse("CAST_IP", config.ip)?;
        config.port = env_parse("CAST_PORT", config.port)?;
        config.facts_ttl = Duration::from_secs(env_parse("CAST_FACTS_TTL_SECS", DEFAULT_FACTS_TTL_SECS)?);

        let retention: u64 = env_parse("CAST_JOB_RETENTION_SECS", 0)?;
        config.job_retention = (retention > 0).then(|| Duration::from_secs(retention));
        config.sweep_interval =
            Duration::from_secs(env_parse("CAST_SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS)?);

        config.max_csr_bytes = env_parse("CAST_MAX_CSR_BYTES", config.max_csr_bytes)?;
        config.certgen_days = env_parse("CAST_CERTGEN_DAYS", config.certgen_days)?;
        config.certgen_size = env_parse("CAST_CERTGEN_SIZE", config.certgen_size)?;
        config.openssl_binary = std::env::var("CAST_OPENSSL_BINARY").unwrap_or(config.openssl_binary);
        config.sv_binary = std::env::var("CAST_SV_BINARY").unwrap_or(config.sv_binary);

        config.logging.level = std::env::var("CAST_LOG_LEVEL").unwrap_or(config.logging.level);
        config.logging.format = std::env::var("CAST_LOG_FORMAT").unwrap_or(config.logging.format);

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval.is_zero() {
            return Err(AppError::Configuration(
                "CAST_SWEEP_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }
        if self.max_csr_bytes == 0 {
            return Err(AppError::Configuration(
                "CAST_MAX_CSR_BYTES must be greater than zero".to_string(),
            ));
        }
        match self.logging.format.as_str() {
            "compact" | "json" => Ok(()),
            other => Err(AppError::Configuration(format!(
                "CAST_LOG_FORMAT must be 'compact' or 'json', got '{}'",
                other
            ))),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// CA output directory holding CSRs and issued certificates.
    pub fn ca_out_dir(&self) -> PathBuf {
        self.ca_dir.join("out")
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|e| {
            AppError::Configuration(format!("{} must be a valid value ('{}'): {}", name, raw, e))
        }),
        Err(_) => Ok(default),
    }
}
