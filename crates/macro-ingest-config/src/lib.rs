// macro-ingest-config - process configuration for the ingestion CLI
//
// Layered, lowest priority first:
// 1. Built-in defaults
// 2. TOML file (path from MDI_CONFIG, else ./mdi.toml when present)
// 3. Environment variables (APP_ENV, BEA_API_KEY, PG_HOST, ...)
//
// The result is validated once and then only ever read.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

mod env_overrides;
mod sources;
mod validation;

pub use env_overrides::{EnvSource, MapEnvSource, StdEnvSource};
pub use sources::{load_from_file_path, CONFIG_PATH_VAR, DEFAULT_CONFIG_FILE};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app_env: AppEnv,
    pub log: LogConfig,
    pub storage: StorageConfig,
    pub bea: BeaConfig,
    pub serving: ServingConfig,
    pub pipeline: PipelineConfig,
    pub alerts: AlertConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppEnv {
    #[default]
    Staging,
    Prod,
}

impl AppEnv {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppEnv::Staging => "staging",
            AppEnv::Prod => "prod",
        }
    }
}

impl std::fmt::Display for AppEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AppEnv {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "staging" => Ok(AppEnv::Staging),
            "prod" => Ok(AppEnv::Prod),
            _ => anyhow::bail!("Unsupported APP_ENV: {}. Supported: staging, prod", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            format: LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" | "pretty" => Ok(LogFormat::Text),
            _ => anyhow::bail!("Unsupported LOG_FORMAT: {}. Supported: json, text", s),
        }
    }
}

/// Raw-store location. `backend` is derived when not set explicitly:
/// s3 when a bucket is configured, the local filesystem otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<StorageBackend>,
    pub prefix_root: String,
    pub max_attempts: u32,
    pub fs: FsConfig,
    pub s3: S3Config,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: None,
            prefix_root: "staging".to_string(),
            max_attempts: 1,
            fs: FsConfig::default(),
            s3: S3Config::default(),
        }
    }
}

impl StorageConfig {
    pub fn backend(&self) -> StorageBackend {
        self.backend.unwrap_or(if self.s3.bucket.is_empty() {
            StorageBackend::Fs
        } else {
            StorageBackend::S3
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Fs,
    S3,
    Memory,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Fs => write!(f, "fs"),
            StorageBackend::S3 => write!(f, "s3"),
            StorageBackend::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fs" | "filesystem" => Ok(StorageBackend::Fs),
            "s3" | "aws" => Ok(StorageBackend::S3),
            "memory" => Ok(StorageBackend::Memory),
            _ => anyhow::bail!("Unsupported storage backend: {}. Supported: fs, s3, memory", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    pub path: String,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            path: "./data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: "us-east-1".to_string(),
            endpoint: None,
        }
    }
}

/// Upstream API settings. The default query is Regional / SQPCE, annual.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaConfig {
    pub api_key: String,
    pub api_url: String,
    pub dataset: String,
    pub table_name: String,
    pub frequency: String,
    pub line_code: String,
    pub geo_fips: String,
    pub year: String,
    pub http_timeout_secs: u64,
}

impl Default for BeaConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_url: "https://apps.bea.gov/api/data".to_string(),
            dataset: "Regional".to_string(),
            table_name: "SQPCE".to_string(),
            frequency: "A".to_string(),
            line_code: "1".to_string(),
            geo_fips: "STATE".to_string(),
            year: "ALL".to_string(),
            http_timeout_secs: 30,
        }
    }
}

impl BeaConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl std::fmt::Debug for BeaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeaConfig")
            .field("api_key", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("dataset", &self.dataset)
            .field("table_name", &self.table_name)
            .field("frequency", &self.frequency)
            .field("line_code", &self.line_code)
            .field("geo_fips", &self.geo_fips)
            .field("year", &self.year)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .finish()
    }
}

/// Serving store. Postgres when a host is configured, SQLite otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<ServingBackend>,
    pub schema_gold: String,
    pub schema_meta: String,
    pub sqlite_path: String,
    pub postgres: PostgresConfig,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            backend: None,
            schema_gold: "gold".to_string(),
            schema_meta: "meta".to_string(),
            sqlite_path: "./data/serving.db".to_string(),
            postgres: PostgresConfig::default(),
        }
    }
}

impl ServingConfig {
    pub fn backend(&self) -> ServingBackend {
        self.backend.unwrap_or(if self.postgres.host.is_empty() {
            ServingBackend::Sqlite
        } else {
            ServingBackend::Postgres
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServingBackend {
    Postgres,
    Sqlite,
}

impl std::fmt::Display for ServingBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServingBackend::Postgres => write!(f, "postgres"),
            ServingBackend::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl std::str::FromStr for ServingBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(ServingBackend::Postgres),
            "sqlite" => Ok(ServingBackend::Sqlite),
            _ => anyhow::bail!("Unsupported serving backend: {}. Supported: postgres, sqlite", s),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 5432,
            database: "macro".to_string(),
            user: String::new(),
            password: String::new(),
        }
    }
}

impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub stage_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_timeout_secs: 300,
        }
    }
}

impl PipelineConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sns_topic_arn: Option<String>,
}

impl AppConfig {
    /// Load from file and process environment, then validate.
    pub fn load() -> Result<Self> {
        sources::load_config(&StdEnvSource)
    }

    /// Same layering against an injected environment (tests, embedding).
    pub fn load_with_env<E: EnvSource>(env: &E) -> Result<Self> {
        sources::load_config(env)
    }

    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }

    /// Copy with a different environment; used for the CLI `--env` flag.
    pub fn with_app_env(&self, app_env: AppEnv) -> Self {
        Self {
            app_env,
            ..self.clone()
        }
    }
}
