//! Command-line interface definition for rpflow
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands to inspect negotiation, start an authorization and
//! process the callback.

use clap::{Parser, Subcommand};

/// rpflow - OAuth 2.0 / OpenID Connect relying party
///
/// Builds authorization requests and validates the callbacks of the
/// authorization servers described in the configuration file.
#[derive(Parser, Debug, Clone)]
#[command(name = "rpflow")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/rpflow.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for rpflow
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Show what a challenge against an issuer would negotiate
    Negotiate {
        /// Issuer of the authorization server
        #[arg(short, long)]
        issuer: String,
    },

    /// Build an authorization request
    Challenge {
        /// Issuer of the authorization server (optional with a single registration)
        #[arg(short, long)]
        issuer: Option<String>,

        /// Scope to request; repeat for several (defaults to the registration scopes)
        #[arg(short, long = "scope")]
        scopes: Vec<String>,

        /// Where to send the user once authenticated
        #[arg(long)]
        target_link_uri: Option<String>,
    },

    /// Process the URL the authorization server redirected to
    Callback {
        /// Full redirection URL, including its query or fragment
        #[arg(short, long)]
        url: String,

        /// Request forgery protection value returned by `challenge`
        #[arg(long)]
        rfp: Option<String>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/rpflow.yaml".to_string()),
            verbose: false,
            command: Commands::Negotiate {
                issuer: String::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default() {
        let cli = Cli::default();
        assert_eq!(cli.config, Some("config/rpflow.yaml".to_string()));
        assert!(!cli.verbose);
    }

    #[test]
    fn test_cli_parse_negotiate() {
        let cli = Cli::try_parse_from(["rpflow", "negotiate", "--issuer", "https://login.example.com/"])
            .unwrap();
        if let Commands::Negotiate { issuer } = cli.command {
            assert_eq!(issuer, "https://login.example.com/");
        } else {
            panic!("Expected Negotiate command");
        }
    }

    #[test]
    fn test_cli_parse_challenge_with_repeated_scopes() {
        let cli = Cli::try_parse_from([
            "rpflow",
            "challenge",
            "--scope",
            "openid",
            "--scope",
            "profile",
            "--target-link-uri",
            "/home",
        ])
        .unwrap();
        if let Commands::Challenge {
            issuer,
            scopes,
            target_link_uri,
        } = cli.command
        {
            assert_eq!(issuer, None);
            assert_eq!(scopes, vec!["openid", "profile"]);
            assert_eq!(target_link_uri.as_deref(), Some("/home"));
        } else {
            panic!("Expected Challenge command");
        }
    }

    #[test]
    fn test_cli_parse_callback() {
        let cli = Cli::try_parse_from([
            "rpflow",
            "--verbose",
            "callback",
            "--url",
            "https://app.example.com/callback?code=abc&state=xyz",
            "--rfp",
            "value",
        ])
        .unwrap();
        assert!(cli.verbose);
        if let Commands::Callback { url, rfp } = cli.command {
            assert!(url.contains("code=abc"));
            assert_eq!(rfp.as_deref(), Some("value"));
        } else {
            panic!("Expected Callback command");
        }
    }

    #[test]
    fn test_cli_callback_requires_url() {
        assert!(Cli::try_parse_from(["rpflow", "callback"]).is_err());
    }

    #[test]
    fn test_cli_global_config_flag() {
        let cli = Cli::try_parse_from(["rpflow", "--config", "custom.yaml", "negotiate", "-i", "https://a/"])
            .unwrap();
        assert_eq!(cli.config.as_deref(), Some("custom.yaml"));
    }
}
