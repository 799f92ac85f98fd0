//! rpflow - OAuth 2.0 / OpenID Connect relying party CLI
//!
#![doc = "rpflow - OAuth 2.0 / OpenID Connect relying party CLI"]
#![doc = "Main entry point for the rpflow command-line host."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rpflow::cli::{Cli, Commands};
use rpflow::commands;
use rpflow::config::Config;

/// Exit status when the authorization server or a validation step rejected
/// the request.
const REJECTED_EXIT_CODE: i32 = 2;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/rpflow.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    // Execute command
    let accepted = match cli.command {
        Commands::Negotiate { issuer } => {
            tracing::info!("Negotiating protocol values for {}", issuer);
            commands::negotiate::run_negotiate(config, &issuer).await?;
            true
        }
        Commands::Challenge {
            issuer,
            scopes,
            target_link_uri,
        } => {
            tracing::info!("Building authorization request");
            if let Some(i) = &issuer {
                tracing::debug!("Using issuer: {}", i);
            }
            if !scopes.is_empty() {
                tracing::debug!("Requested scopes: {}", scopes.join(" "));
            }
            commands::challenge::run_challenge(config, issuer, scopes, target_link_uri).await?
        }
        Commands::Callback { url, rfp } => {
            tracing::info!("Processing authorization callback");
            if rfp.is_none() {
                tracing::debug!("No request forgery protection value supplied");
            }
            commands::callback::run_callback(config, &url, rfp).await?
        }
    };

    if !accepted {
        std::process::exit(REJECTED_EXIT_CODE);
    }
    Ok(())
}

/// Initialize tracing subscriber with environment filter
fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "rpflow=debug" } else { "rpflow=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
