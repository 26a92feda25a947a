//! macro-ingest - BEA macro-economic ingestion pipeline
//!
//! The `mdi` binary is a thin wrapper over [`run`]. Stages live in
//! [`pipeline`]; upstream access in [`extract`]. Storage, serving and the
//! shared model come from the workspace crates.

pub mod alert;
pub mod cli;
pub mod extract;
pub mod init;
pub mod pipeline;

use std::process::ExitCode;

use macro_ingest_config::AppConfig;
use macro_ingest_core::ErrorCode;
use tracing::{error, info};

pub use alert::{FailureNotifier, LogNotifier};
pub use cli::{resolve_run_id, Cli, Command, RunArgs};
pub use extract::{BeaClient, Extraction, ExtractionError, Extractor};
pub use init::init_tracing;
pub use pipeline::{Clock, Pipeline, RunOptions, RunReport};

/// Execute one CLI command and map the outcome to a process exit code.
pub async fn run(cli: Cli) -> ExitCode {
    let args = cli.command.args().clone();

    let config = match AppConfig::load() {
        Ok(config) => args.apply_env(config),
        Err(e) => {
            init_tracing(&AppConfig::default());
            return configuration_failure(&cli, &e);
        }
    };
    init_tracing(&config);
    // again now that `--env` is applied and warnings have somewhere to go
    if let Err(e) = config.validate() {
        return configuration_failure(&cli, &e);
    }

    let options = args.run_options();
    info!(
        run_id = %options.run_id,
        command = cli.command.name(),
        app_env = %config.app_env,
        smoke = options.smoke,
        "Starting"
    );

    let pipeline = match Pipeline::from_config(&config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            let code = e.code();
            error!(
                run_id = %options.run_id,
                error_code = code.as_str(),
                error_kind = code.kind(),
                "{e}"
            );
            return ExitCode::from(code.exit_code());
        }
    };

    let outcome = match &cli.command {
        Command::Ingest(_) => pipeline.ingest(&options).await,
        Command::Transform(_) => pipeline.transform(&options).await,
        Command::Load(_) => pipeline.load(&options).await,
        Command::RunAll(_) => pipeline.run_all(&options).await,
    };

    match outcome {
        Ok(report) => {
            info!(
                run_id = %report.run_id,
                command = cli.command.name(),
                status = %report.status,
                "Done"
            );
            ExitCode::SUCCESS
        }
        Err(failure) => {
            let code = failure.code();
            error!(
                run_id = %failure.run_id,
                stage = %failure.stage,
                error_code = code.as_str(),
                error_kind = code.kind(),
                "{}",
                failure.error
            );
            ExitCode::from(code.exit_code())
        }
    }
}

fn configuration_failure(cli: &Cli, e: &anyhow::Error) -> ExitCode {
    let code = ErrorCode::E001Configuration;
    error!(
        command = cli.command.name(),
        error_code = code.as_str(),
        error_kind = code.kind(),
        "[E001] configuration error: {e:#}"
    );
    ExitCode::from(code.exit_code())
}
