//! Settings file management

use std::fmt;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::PlatformError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Environment variable overriding the secrets encryption key
pub const SECRET_KEY_ENV: &str = "DOCKYARD_SECRET_KEY";

/// Environment variable overriding the access token signing secret
pub const JWT_SECRET_ENV: &str = "DOCKYARD_JWT_SECRET";

/// Service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,

    /// Also write daily-rolling log files under the logs directory
    #[serde(default)]
    pub log_to_file: bool,

    /// HTTP API configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Container runtime configuration
    #[serde(default)]
    pub runtime: RuntimeSettings,

    /// Keep projects and deployments in a JSON snapshot instead of memory only
    #[serde(default = "default_true")]
    pub persist_store: bool,

    /// Collector URL for platform events; events are dropped when unset
    #[serde(default)]
    pub events_endpoint: Option<String>,

    /// Secret material; environment variables take precedence
    #[serde(default, skip_serializing)]
    pub secrets: SecretSettings,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            server: ServerSettings::default(),
            runtime: RuntimeSettings::default(),
            persist_store: true,
            events_endpoint: None,
            secrets: SecretSettings::default(),
        }
    }
}

impl Settings {
    /// Read the settings file, falling back to defaults when it does not exist
    pub async fn load(file: &File) -> Result<Self, PlatformError> {
        if !file.exists().await {
            return Ok(Self::default());
        }
        file.read_json::<Settings>().await.map_err(|e| {
            PlatformError::ConfigError(format!(
                "Unable to read settings file {}: {}",
                file.path().display(),
                e
            ))
        })
    }

    /// Resolve both secrets, environment first
    pub fn resolve_secrets(&self) -> Result<ResolvedSecrets, PlatformError> {
        Ok(ResolvedSecrets {
            secret_key: resolve_secret(SECRET_KEY_ENV, self.secrets.secret_key.as_deref())?,
            jwt_secret: resolve_secret(JWT_SECRET_ENV, self.secrets.jwt_secret.as_deref())?,
        })
    }
}

fn resolve_secret(env_var: &str, fallback: Option<&str>) -> Result<SecretString, PlatformError> {
    let value = std::env::var(env_var)
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| fallback.filter(|v| !v.is_empty()).map(str::to_string))
        .ok_or_else(|| {
            PlatformError::ConfigError(format!(
                "{} is not set and no value is configured in settings",
                env_var
            ))
        })?;
    Ok(SecretString::from(value))
}

/// Secret material as read from the settings file
#[derive(Clone, Default, Deserialize)]
pub struct SecretSettings {
    #[serde(default)]
    pub secret_key: Option<String>,

    #[serde(default)]
    pub jwt_secret: Option<String>,
}

impl fmt::Debug for SecretSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretSettings")
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Secrets ready for use
pub struct ResolvedSecrets {
    pub secret_key: SecretString,
    pub jwt_secret: SecretString,
}

/// HTTP API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Container runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,

    #[serde(default = "default_git_binary")]
    pub git_binary: String,

    /// Shared network joined by every project container and the proxy
    #[serde(default = "default_network")]
    pub network: String,

    /// Apex domain project subdomains are routed under
    #[serde(default = "default_domain")]
    pub domain: String,

    /// CPU cores per container
    #[serde(default = "default_cpus")]
    pub cpus: f64,

    /// Memory per container in MiB
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_git_binary() -> String {
    "git".to_string()
}

fn default_network() -> String {
    "dockyard".to_string()
}

fn default_domain() -> String {
    "localhost".to_string()
}

fn default_cpus() -> f64 {
    0.5
}

fn default_memory_mb() -> u64 {
    512
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            docker_binary: default_docker_binary(),
            git_binary: default_git_binary(),
            network: default_network(),
            domain: default_domain(),
            cpus: default_cpus(),
            memory_mb: default_memory_mb(),
        }
    }
}
