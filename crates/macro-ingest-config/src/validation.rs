// Configuration validation
//
// Checks values that would make every command fail. Requirements that only
// matter to one stage (API key, postgres credentials) are checked when that
// stage starts, so `mdi transform` works without a BEA key.

use anyhow::{bail, Result};
use tracing::warn;

use crate::*;

const LOG_LEVELS: &[&str] = &["TRACE", "DEBUG", "INFO", "WARN", "WARNING", "ERROR"];

pub fn validate_config(config: &AppConfig) -> Result<()> {
    validate_log_config(&config.log)?;
    validate_storage_config(&config.storage)?;
    validate_bea_config(&config.bea)?;
    validate_serving_config(&config.serving)?;

    if config.pipeline.stage_timeout_secs == 0 {
        bail!("pipeline.stage_timeout_secs must be greater than 0");
    }

    if config.app_env == AppEnv::Prod && config.storage.prefix_root == "staging" {
        warn!("APP_ENV is prod but S3_PREFIX_ROOT is still 'staging'");
    }

    Ok(())
}

fn validate_log_config(config: &LogConfig) -> Result<()> {
    let level = config.level.trim().to_uppercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        bail!(
            "log level '{}' is not one of TRACE, DEBUG, INFO, WARN, ERROR",
            config.level
        );
    }
    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<()> {
    if config.max_attempts == 0 {
        bail!("storage.max_attempts must be at least 1");
    }

    if config.max_attempts > 10 {
        warn!(
            max_attempts = config.max_attempts,
            "storage.max_attempts is very large; failed runs will take long to surface"
        );
    }

    match config.backend() {
        StorageBackend::Fs => {
            if config.fs.path.is_empty() {
                bail!("storage.fs.path must not be empty");
            }
        }
        StorageBackend::S3 => {
            if config.s3.bucket.is_empty() {
                bail!("storage.s3.bucket is required for S3 backend");
            }
            if config.s3.region.is_empty() {
                bail!("storage.s3.region is required for S3 backend");
            }
        }
        StorageBackend::Memory => {}
    }

    Ok(())
}

fn validate_bea_config(config: &BeaConfig) -> Result<()> {
    if config.api_url.is_empty() {
        bail!("bea.api_url must not be empty");
    }
    if config.dataset.is_empty() || config.table_name.is_empty() {
        bail!("bea.dataset and bea.table_name must not be empty");
    }
    if config.http_timeout_secs == 0 {
        bail!("bea.http_timeout_secs must be greater than 0");
    }
    Ok(())
}

fn validate_serving_config(config: &ServingConfig) -> Result<()> {
    if config.postgres.port == 0 {
        bail!("serving.postgres.port must be greater than 0");
    }
    if config.schema_gold.is_empty() || config.schema_meta.is_empty() {
        bail!("serving schemas must not be empty");
    }
    if config.backend() == ServingBackend::Sqlite && config.sqlite_path.is_empty() {
        bail!("serving.sqlite_path is required for the sqlite backend");
    }
    Ok(())
}
