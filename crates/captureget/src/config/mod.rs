use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::pipeline::DEFAULT_MAX_UPLOAD_BYTES;

/// Signing secret used outside production when `APP_JWT_SECRET` is unset.
const DEVELOPMENT_JWT_SECRET: &str = "captureget-development-secret";

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "5000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let jwt_secret = match non_empty_var("APP_JWT_SECRET") {
            Some(secret) => secret,
            None if environment == AppEnvironment::Production => {
                return Err(ConfigError::MissingJwtSecret)
            }
            None => DEVELOPMENT_JWT_SECRET.to_string(),
        };

        let max_upload_bytes = match non_empty_var("APP_MAX_UPLOAD_BYTES") {
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|bytes| *bytes > 0)
                .ok_or(ConfigError::InvalidUploadLimit)?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            auth: AuthConfig { jwt_secret },
            storage: StorageConfig {
                database_path: non_empty_var("APP_DATABASE_PATH").map(PathBuf::from),
                upload_dir: non_empty_var("APP_UPLOAD_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("uploads")),
                upload_base_url: non_empty_var("APP_UPLOAD_BASE_URL")
                    .map(|url| url.trim_end_matches('/').to_string())
                    .unwrap_or_else(|| "/uploads".to_string()),
                max_upload_bytes,
            },
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Bearer token verification.
#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .finish()
    }
}

/// Where records and uploaded files live.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// SQLite file; the in-memory store is used when unset.
    pub database_path: Option<PathBuf>,
    pub upload_dir: PathBuf,
    pub upload_base_url: String,
    pub max_upload_bytes: usize,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    MissingJwtSecret,
    InvalidUploadLimit,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::MissingJwtSecret => {
                write!(f, "APP_JWT_SECRET must be set in production")
            }
            ConfigError::InvalidUploadLimit => {
                write!(f, "APP_MAX_UPLOAD_BYTES must be a positive byte count")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::MissingJwtSecret
            | ConfigError::InvalidUploadLimit => None,
        }
    }
}
