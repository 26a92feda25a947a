//! Command line surface of `mdi`.

use clap::{Args, Parser, Subcommand, ValueEnum};
use macro_ingest_config::{AppConfig, AppEnv};
use uuid::Uuid;

use crate::pipeline::RunOptions;

#[derive(Parser, Debug)]
#[command(name = "mdi")]
#[command(version)]
#[command(about = "Ingest BEA macro-economic statistics into bronze, silver and gold layers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Pull from the BEA API and store the raw payload
    Ingest(RunArgs),
    /// Build silver and gold tables from the newest raw payload
    Transform(RunArgs),
    /// Upsert the newest gold table into the serving store
    Load(RunArgs),
    /// Ingest, transform and load under one run id
    RunAll(RunArgs),
}

impl Command {
    pub fn args(&self) -> &RunArgs {
        match self {
            Command::Ingest(args) | Command::Transform(args) | Command::Load(args) | Command::RunAll(args) => args,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Ingest(_) => "ingest",
            Command::Transform(_) => "transform",
            Command::Load(_) => "load",
            Command::RunAll(_) => "run-all",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Target environment; APP_ENV (staging unless set) when omitted
    #[arg(long = "env", value_enum)]
    pub env: Option<EnvArg>,

    /// Run identifier; generated when omitted
    #[arg(long)]
    pub run_id: Option<String>,

    /// Reduced pull covering only the last five years
    #[arg(long)]
    pub smoke: bool,
}

impl RunArgs {
    /// `config` with `--env` applied, if given.
    pub fn apply_env(&self, config: AppConfig) -> AppConfig {
        match self.env {
            Some(env) => config.with_app_env(env.into()),
            None => config,
        }
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            run_id: resolve_run_id(self.run_id.as_deref()),
            smoke: self.smoke,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvArg {
    Staging,
    Prod,
}

impl From<EnvArg> for AppEnv {
    fn from(env: EnvArg) -> Self {
        match env {
            EnvArg::Staging => AppEnv::Staging,
            EnvArg::Prod => AppEnv::Prod,
        }
    }
}

/// The given id, or `run-<uuid v4>` when absent or empty.
pub fn resolve_run_id(run_id: Option<&str>) -> String {
    match run_id {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => format!("run-{}", Uuid::new_v4()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_run_id_is_kept() {
        assert_eq!(resolve_run_id(Some("run-123")), "run-123");
    }

    #[test]
    fn generated_run_ids_are_distinct() {
        let a = resolve_run_id(None);
        let b = resolve_run_id(Some(""));
        assert!(a.starts_with("run-"));
        assert!(b.starts_with("run-"));
        assert_ne!(a, b);
        assert_eq!(a.len(), "run-".len() + 36);
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
