use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};

use crate::{AppConfig, AppEnv, LogFormat, ServingBackend, StorageBackend};

/// Abstraction over environment-variable lookups so tests can inject a map
/// instead of touching the process environment.
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdEnvSource;

impl EnvSource for StdEnvSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MapEnvSource(HashMap<String, String>);

impl MapEnvSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapEnvSource {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl EnvSource for MapEnvSource {
    fn get(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }
}

/// Apply environment-variable overrides (highest priority) to the config.
///
/// A variable that is set but empty counts as set, so `S3_DATA_BUCKET=`
/// clears a bucket from the config file. `SNS_ALERT_TOPIC_ARN` is the
/// exception: empty means no topic.
pub fn apply_env_overrides<E: EnvSource>(config: &mut AppConfig, env: &E) -> Result<()> {
    if let Some(app_env) = get_env_parsed::<AppEnv, E>(env, "APP_ENV")? {
        config.app_env = app_env;
    }

    // Logging
    if let Some(level) = env.get("LOG_LEVEL") {
        config.log.level = level;
    }
    if let Some(format) = get_env_parsed::<LogFormat, E>(env, "LOG_FORMAT")? {
        config.log.format = format;
    }

    // Raw store
    if let Some(backend) = env.get("STORAGE_BACKEND").filter(|v| !v.is_empty()) {
        config.storage.backend = Some(
            backend
                .parse::<StorageBackend>()
                .context("Invalid STORAGE_BACKEND value")?,
        );
    }
    if let Some(bucket) = env.get("S3_DATA_BUCKET") {
        config.storage.s3.bucket = bucket;
    }
    if let Some(region) = env.get("AWS_REGION") {
        config.storage.s3.region = region;
    }
    if let Some(endpoint) = env.get("S3_ENDPOINT") {
        config.storage.s3.endpoint = Some(endpoint).filter(|e| !e.is_empty());
    }
    if let Some(prefix) = env.get("S3_PREFIX_ROOT") {
        config.storage.prefix_root = prefix;
    }
    if let Some(path) = env.get("LOCAL_DATA_DIR") {
        config.storage.fs.path = path;
    }
    if let Some(attempts) = get_env_parsed::<u32, E>(env, "STORAGE_MAX_ATTEMPTS")? {
        config.storage.max_attempts = attempts;
    }

    // Upstream API
    if let Some(key) = env.get("BEA_API_KEY") {
        config.bea.api_key = key;
    }
    if let Some(url) = env.get("BEA_API_URL") {
        config.bea.api_url = url;
    }
    if let Some(dataset) = env.get("BEA_DATASET") {
        config.bea.dataset = dataset;
    }
    if let Some(table) = env.get("BEA_TABLE_NAME") {
        config.bea.table_name = table;
    }
    if let Some(frequency) = env.get("BEA_FREQUENCY") {
        config.bea.frequency = frequency;
    }
    if let Some(line_code) = env.get("BEA_LINE_CODE") {
        config.bea.line_code = line_code;
    }
    if let Some(geo_fips) = env.get("BEA_GEO_FIPS") {
        config.bea.geo_fips = geo_fips;
    }
    if let Some(year) = env.get("BEA_YEAR") {
        config.bea.year = year;
    }
    if let Some(secs) = get_env_parsed::<u64, E>(env, "HTTP_TIMEOUT_SECS")? {
        config.bea.http_timeout_secs = secs;
    }

    // Serving store
    if let Some(backend) = env.get("SERVING_BACKEND").filter(|v| !v.is_empty()) {
        config.serving.backend = Some(
            backend
                .parse::<ServingBackend>()
                .context("Invalid SERVING_BACKEND value")?,
        );
    }
    if let Some(host) = env.get("PG_HOST") {
        config.serving.postgres.host = host;
    }
    if let Some(port) = get_env_parsed::<u16, E>(env, "PG_PORT")? {
        config.serving.postgres.port = port;
    }
    if let Some(database) = env.get("PG_DATABASE") {
        config.serving.postgres.database = database;
    }
    if let Some(user) = env.get("PG_USER") {
        config.serving.postgres.user = user;
    }
    if let Some(password) = env.get("PG_PASSWORD") {
        config.serving.postgres.password = password;
    }
    if let Some(schema) = env.get("PG_SCHEMA_GOLD") {
        config.serving.schema_gold = schema;
    }
    if let Some(schema) = env.get("PG_SCHEMA_META") {
        config.serving.schema_meta = schema;
    }
    if let Some(path) = env.get("SQLITE_PATH") {
        config.serving.sqlite_path = path;
    }

    // Pipeline and alerting
    if let Some(secs) = get_env_parsed::<u64, E>(env, "STAGE_TIMEOUT_SECS")? {
        config.pipeline.stage_timeout_secs = secs;
    }
    if let Some(arn) = env.get("SNS_ALERT_TOPIC_ARN") {
        config.alerts.sns_topic_arn = Some(arn).filter(|a| !a.is_empty());
    }

    Ok(())
}

fn get_env_parsed<T, E>(env: &E, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    E: EnvSource,
{
    match env.get(key) {
        Some(val) => {
            let parsed = val
                .trim()
                .parse::<T>()
                .map_err(|e| anyhow!("Failed to parse {}='{}': {}", key, val, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let env = MapEnvSource::new()
            .with("APP_ENV", "prod")
            .with("PG_PORT", "6543")
            .with("BEA_TABLE_NAME", "SAINC1")
            .with("S3_DATA_BUCKET", "macro-data");
        let mut config = AppConfig::default();
        apply_env_overrides(&mut config, &env).unwrap();

        assert_eq!(config.app_env, AppEnv::Prod);
        assert_eq!(config.serving.postgres.port, 6543);
        assert_eq!(config.bea.table_name, "SAINC1");
        assert_eq!(config.storage.backend(), StorageBackend::S3);
        // untouched values keep their defaults
        assert_eq!(config.bea.dataset, "Regional");
    }

    #[test]
    fn unparseable_number_names_the_variable() {
        let env = MapEnvSource::new().with("PG_PORT", "five");
        let err = apply_env_overrides(&mut AppConfig::default(), &env).unwrap_err();
        assert!(err.to_string().contains("PG_PORT"), "got {err}");
    }

    #[test]
    fn empty_topic_means_none() {
        let env = MapEnvSource::new().with("SNS_ALERT_TOPIC_ARN", "");
        let mut config = AppConfig::default();
        config.alerts.sns_topic_arn = Some("arn:aws:sns:us-east-1:1:x".into());
        apply_env_overrides(&mut config, &env).unwrap();
        assert!(config.alerts.sns_topic_arn.is_none());
    }

    #[test]
    fn invalid_backend_is_rejected() {
        let env = MapEnvSource::new().with("SERVING_BACKEND", "mysql");
        assert!(apply_env_overrides(&mut AppConfig::default(), &env).is_err());
    }
}
