use std::process::ExitCode;

use clap::Parser;
use skybox_equi::cli::{run, Cli};
use tracing::level_filters::LevelFilter;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let app_root = std::env::current_dir()?;
    let outcome = run(&cli, app_root.as_path())?;
    if outcome.succeeded() {
        return Ok(ExitCode::SUCCESS);
    }
    error!(
        failed_sets = outcome.summary.failed,
        fetch_failures = outcome.fetch_failures,
        report = %outcome.report_path.display(),
        "tour finished with failures"
    );
    Ok(ExitCode::FAILURE)
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}
