use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use macro_ingest::Cli;

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match build_runtime() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("[E007] {e:#}");
            return ExitCode::from(1);
        }
    };

    runtime.block_on(macro_ingest::run(cli))
}
