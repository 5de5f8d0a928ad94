//! ssobroker CLI binary entry point.

use clap::Parser;
use ssobroker::cli::{Cli, Commands};
use ssobroker::config::BrokerConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let filter =
        EnvFilter::try_from_env("SSOBROKER_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            if let Some(broker_error) = e.downcast_ref::<ssobroker::error::BrokerError>() {
                eprintln!("Hint: {:?}", broker_error.recovery_suggestion());
            }
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(path) => BrokerConfig::load_from_path(path)?,
        None => BrokerConfig::load()?,
    };

    match cli.command {
        Commands::Login(args) => ssobroker::cli::auth::handle_login(config, &args).await?,
        Commands::Status => ssobroker::cli::auth::handle_status(config).await?,
        Commands::Logout => ssobroker::cli::auth::handle_logout(config).await?,
        Commands::Credentials(args) => {
            ssobroker::cli::credentials::handle_credentials(config, &args).await?
        }
        Commands::Accounts(args) => {
            ssobroker::cli::credentials::handle_accounts(config, &args).await?
        }
        Commands::Roles(args) => ssobroker::cli::credentials::handle_roles(config, &args).await?,
        Commands::Exec(args) => {
            return ssobroker::cli::credentials::handle_exec(config, &args).await
        }
    }
    Ok(0)
}
