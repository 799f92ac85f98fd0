//! Configuration management for rpflow
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides, and
//! builds the collaborators of a [`RelyingParty`] from it.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::{self, RANDOM_VALUE_LENGTH};
use crate::discovery::{ServerConfiguration, StaticConfigurationProvider};
use crate::error::{Result, RpError};
use crate::registration::{ClientRegistration, RegistrationStore};
use crate::service::{RelyingParty, Services};
use crate::tokens::jwt::JwtTokenDispatcher;
use crate::transport::http::HttpTransport;

/// Minimum length, in bytes, of the state token signing key.
pub const MIN_SIGNING_KEY_LENGTH: usize = 32;

/// Main configuration structure for rpflow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Client registrations, one per authorization server
    #[serde(default)]
    pub registrations: Vec<ClientRegistration>,
    /// Server configuration documents served without discovery
    #[serde(default)]
    pub servers: Vec<ServerConfiguration>,
    /// State token signing
    #[serde(default)]
    pub state_token: StateTokenConfig,
    /// Backchannel HTTP client
    #[serde(default)]
    pub http: HttpConfig,
}

/// State token configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct StateTokenConfig {
    /// HMAC key signing state tokens. When absent, an ephemeral key is
    /// generated at startup and state tokens do not survive a restart.
    #[serde(default)]
    pub signing_key: Option<String>,
    /// State token lifetime
    #[serde(default = "default_state_token_lifetime")]
    pub lifetime_seconds: u64,
}

fn default_state_token_lifetime() -> u64 {
    900
}

impl Default for StateTokenConfig {
    fn default() -> Self {
        Self {
            signing_key: None,
            lifetime_seconds: default_state_token_lifetime(),
        }
    }
}

impl std::fmt::Debug for StateTokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateTokenConfig")
            .field("signing_key", &self.signing_key.as_ref().map(|_| "<redacted>"))
            .field("lifetime_seconds", &self.lifetime_seconds)
            .finish()
    }
}

/// HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout
    #[serde(default = "default_http_timeout")]
    pub timeout_seconds: u64,
    /// `User-Agent` header
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_http_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("rpflow/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_http_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RpError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| RpError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(key) = std::env::var("RPFLOW_STATE_TOKEN_KEY") {
            self.state_token.signing_key = Some(key);
            tracing::debug!("Env override: RPFLOW_STATE_TOKEN_KEY");
        }

        if let Ok(lifetime) = std::env::var("RPFLOW_STATE_TOKEN_LIFETIME") {
            match lifetime.parse::<u64>() {
                Ok(v) => {
                    self.state_token.lifetime_seconds = v;
                    tracing::debug!(lifetime_seconds = v, "Env override: RPFLOW_STATE_TOKEN_LIFETIME");
                }
                Err(_) => {
                    tracing::warn!("Invalid value for RPFLOW_STATE_TOKEN_LIFETIME: {}", lifetime);
                }
            }
        }

        if let Ok(timeout) = std::env::var("RPFLOW_HTTP_TIMEOUT") {
            match timeout.parse::<u64>() {
                Ok(v) => {
                    self.http.timeout_seconds = v;
                    tracing::debug!(timeout_seconds = v, "Env override: RPFLOW_HTTP_TIMEOUT");
                }
                Err(_) => {
                    tracing::warn!("Invalid value for RPFLOW_HTTP_TIMEOUT: {}", timeout);
                }
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`RpError::Config`] describing the first failed check
    pub fn validate(&self) -> Result<()> {
        let mut issuers = HashSet::new();
        for registration in &self.registrations {
            if registration.client_id.is_empty() {
                return Err(RpError::Config(format!(
                    "registration for {} has an empty client_id",
                    registration.issuer
                ))
                .into());
            }
            if registration.issuer.cannot_be_a_base() || registration.issuer.host().is_none() {
                return Err(RpError::Config(format!(
                    "registration issuer {} must be an absolute URL",
                    registration.issuer
                ))
                .into());
            }
            if let Some(redirect_uri) = &registration.redirect_uri {
                if redirect_uri.cannot_be_a_base() {
                    return Err(RpError::Config(format!(
                        "redirect_uri {} must be an absolute URL",
                        redirect_uri
                    ))
                    .into());
                }
            }
            if !issuers.insert(registration.issuer.clone()) {
                return Err(RpError::Config(format!(
                    "duplicate registration for issuer {}",
                    registration.issuer
                ))
                .into());
            }
        }

        for server in &self.servers {
            if !issuers.contains(&server.issuer) {
                return Err(RpError::Config(format!(
                    "server configuration {} has no matching registration",
                    server.issuer
                ))
                .into());
            }
        }

        if let Some(key) = &self.state_token.signing_key {
            if key.len() < MIN_SIGNING_KEY_LENGTH {
                return Err(RpError::Config(format!(
                    "state_token.signing_key must be at least {} bytes",
                    MIN_SIGNING_KEY_LENGTH
                ))
                .into());
            }
        }

        if self.state_token.lifetime_seconds == 0 {
            return Err(RpError::Config(
                "state_token.lifetime_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.http.timeout_seconds == 0 {
            return Err(
                RpError::Config("http.timeout_seconds must be greater than 0".to_string()).into(),
            );
        }

        Ok(())
    }

    /// Builds the collaborators described by this configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn services(&self) -> Result<Services> {
        let transport = HttpTransport::with_settings(
            Duration::from_secs(self.http.timeout_seconds),
            &self.http.user_agent,
        )?;

        let signing_key = match &self.state_token.signing_key {
            Some(key) => key.clone().into_bytes(),
            None => {
                tracing::warn!(
                    "No state token signing key configured, using an ephemeral key; \
                     callbacks will fail after a restart"
                );
                crypto::random_token(RANDOM_VALUE_LENGTH).into_bytes()
            }
        };
        let tokens = JwtTokenDispatcher::new(
            signing_key,
            Duration::from_secs(self.state_token.lifetime_seconds),
            transport.client().clone(),
        );

        Ok(Services {
            registrations: Arc::new(RegistrationStore::new(self.registrations.clone())),
            configurations: Arc::new(StaticConfigurationProvider::new(self.servers.clone())),
            tokens: Arc::new(tokens),
            transport: Arc::new(transport),
        })
    }

    /// Builds a relying party from this configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the collaborators cannot be built
    pub fn relying_party(&self) -> Result<RelyingParty> {
        Ok(RelyingParty::new(self.services()?))
    }
}
