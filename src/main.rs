//! oidc-rp - OpenID Connect relying party
//!
#![doc = "Main entry point for the oidc-rp reference host and tooling."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use oidc_rp::cli::{Cli, Commands};
use oidc_rp::commands;
use oidc_rp::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose, cli.json_logs);

    // Load configuration
    let config = Config::load(cli.config_path(), &cli)?;

    // Execute command
    match cli.command {
        Commands::Serve { .. } => {
            tracing::info!("Starting reference host");
            config.validate()?;
            commands::serve::run_serve(config).await?;
            Ok(())
        }
        Commands::AuthorizeUrl { audience } => {
            config.client.validate()?;
            commands::urls::print_authorize_url(&config, audience.as_deref())?;
            Ok(())
        }
        Commands::LogoutUrl {
            return_to,
            host,
            scheme,
        } => {
            config.client.validate()?;
            commands::urls::print_logout_url(&config, return_to.as_deref(), &host, &scheme)?;
            Ok(())
        }
        Commands::CheckConfig => {
            commands::check::run_check(&config)?;
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter
fn init_tracing(verbose: bool, json: bool) {
    let default_directive = if verbose { "oidc_rp=debug" } else { "oidc_rp=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
