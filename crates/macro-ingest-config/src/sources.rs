// Configuration source loading.
//
// Priority order:
// 1. Environment variables
// 2. Config file path from MDI_CONFIG
// 3. Default config file (./mdi.toml)
// 4. Built-in defaults

use std::path::Path;

use anyhow::{Context, Result};

use crate::env_overrides::{self, EnvSource};
use crate::AppConfig;

pub const CONFIG_PATH_VAR: &str = "MDI_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "./mdi.toml";

pub(crate) fn load_config<E: EnvSource>(env: &E) -> Result<AppConfig> {
    let mut config = load_from_file(env)?.unwrap_or_default();
    env_overrides::apply_env_overrides(&mut config, env)?;
    config.validate()?;
    Ok(config)
}

fn load_from_file<E: EnvSource>(env: &E) -> Result<Option<AppConfig>> {
    if let Some(path) = env.get(CONFIG_PATH_VAR).filter(|p| !p.is_empty()) {
        return read_file(Path::new(&path)).map(Some);
    }

    let default_path = Path::new(DEFAULT_CONFIG_FILE);
    if default_path.exists() {
        return read_file(default_path).map(Some);
    }

    Ok(None)
}

fn read_file(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    // Missing keys fall back to their defaults through #[serde(default)]
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Load configuration from a specific file, then apply environment overrides.
/// Returns an error if the file doesn't exist or can't be parsed.
pub fn load_from_file_path<E: EnvSource>(path: impl AsRef<Path>, env: &E) -> Result<AppConfig> {
    let mut config = read_file(path.as_ref())?;
    env_overrides::apply_env_overrides(&mut config, env)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::{AppEnv, MapEnvSource, ServingBackend};

    fn toml_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn file_values_sit_between_defaults_and_env() {
        let file = toml_file(
            r#"
app_env = "prod"

[serving]
schema_gold = "analytics"

[serving.postgres]
host = "db.internal"
user = "loader"
"#,
        );
        let env = MapEnvSource::new()
            .with(CONFIG_PATH_VAR, &file.path().display().to_string())
            .with("PG_SCHEMA_GOLD", "gold_v2");
        let config = load_config(&env).unwrap();

        assert_eq!(config.app_env, AppEnv::Prod);
        assert_eq!(config.serving.schema_gold, "gold_v2");
        assert_eq!(config.serving.postgres.host, "db.internal");
        assert_eq!(config.serving.postgres.port, 5432);
        assert_eq!(config.serving.backend(), ServingBackend::Postgres);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let env = MapEnvSource::new().with(CONFIG_PATH_VAR, "/nonexistent/mdi.toml");
        let err = load_config(&env).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to read config file"));
    }

    #[test]
    fn explicit_path_loader_validates() {
        let file = toml_file("[pipeline]\nstage_timeout_secs = 0\n");
        assert!(load_from_file_path(file.path(), &MapEnvSource::new()).is_err());
    }
}
