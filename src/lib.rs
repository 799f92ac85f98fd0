//! rpflow - OAuth 2.0 / OpenID Connect relying party library
//!
//! This library provides the client side of the authorization code, implicit
//! and hybrid flows: building authorization requests, validating the
//! authorization response, redeeming the code and querying userinfo.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `pipeline`: Ordered handler runtime and the two pipeline contexts
//! - `challenge`: Handlers producing an authorization request
//! - `authentication`: Handlers validating a redirection callback
//! - `negotiation`: Grant type, response type/mode, PKCE and client
//!   authentication negotiation
//! - `tokens` / `transport`: Collaborator traits and their default
//!   implementations
//! - `service`: The `RelyingParty` façade wiring everything together
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use rpflow::pipeline::ChallengeDemand;
//! use rpflow::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/rpflow.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let relying_party = config.relying_party()?;
//!     let outcome = relying_party.challenge(ChallengeDemand::default()).await?;
//!     println!("{:?}", outcome);
//!     Ok(())
//! }
//! ```

pub mod authentication;
pub mod challenge;
pub mod cli;
pub mod commands;
pub mod config;
pub mod crypto;
pub mod discovery;
pub mod error;
pub mod negotiation;
pub mod pipeline;
pub mod principal;
pub mod protocol;
pub mod registration;
pub mod service;
pub mod state_token;
pub mod tokens;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use error::{Rejection, Result, RpError, Verdict};
pub use pipeline::{AuthenticationRequest, ChallengeDemand};
pub use principal::Principal;
pub use service::{AuthenticationOutcome, ChallengeOutcome, RelyingParty};

#[cfg(test)]
pub mod test_utils;
