use std::{path::Path, process::ExitCode};

use clap::Parser;
use tracing::{debug, error};
use tracing_subscriber::{EnvFilter, fmt::time::LocalTime};

use tordl::{
    config::{Cli, DEFAULT_ENV_FILE, Settings, load_env_file},
    prompt::{Operator, TermPrompt},
    workflow,
};

#[tokio::main]
async fn main() -> ExitCode {
    // Loaded before parsing so that clap sees the variables.
    let env_loaded = load_env_file(Path::new(DEFAULT_ENV_FILE));
    let cli = Cli::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tordl=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_timer(LocalTime::rfc_3339())
        .init();

    match env_loaded {
        Ok(true) => debug!("Loaded {DEFAULT_ENV_FILE}"),
        Ok(false) => debug!("No {DEFAULT_ENV_FILE} file, using the environment only"),
        Err(e) => {
            error!("{e:#}");
            return ExitCode::FAILURE;
        }
    }

    let settings = match Settings::from_cli(cli) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Invalid configuration: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let operator = if settings.interactive {
        Operator::new(true, Box::new(TermPrompt::new()))
    } else {
        Operator::unattended()
    };

    match workflow::run(settings, operator).await {}
}
