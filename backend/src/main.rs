// Main application entry point

use std::process::ExitCode;

use tracing_subscriber::EnvFilter;
use voting_backend::config::AppConfig;

#[rocket::main]
async fn main() -> ExitCode {
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("voting-backend: {err}");
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .init();

    tracing::info!(
        store = ?config.store_backend,
        default_session = %config.default_session_id,
        "starting voting backend"
    );

    let rocket = match voting_backend::build(config) {
        Ok(rocket) => rocket,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match rocket.launch().await {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "rocket failed to launch");
            ExitCode::FAILURE
        }
    }
}
