/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

It exposes three top-level command modules:

- `negotiate`: Report negotiated protocol values for an issuer
- `challenge`: Build an authorization request
- `callback`: Validate a redirection callback

Every handler prints a single JSON document to stdout.
*/

use serde_json::json;
use url::Url;

use crate::config::Config;
use crate::error::{Result, RpError};
use crate::protocol::Parameters;

fn parse_issuer(value: &str) -> Result<Url> {
    Url::parse(value).map_err(|e| RpError::Config(format!("invalid issuer '{}': {}", value, e)).into())
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Extracts the callback parameters from a redirection URL: the query, or
/// the fragment when the query is empty.
pub fn callback_parameters(url: &Url) -> Parameters {
    match (url.query(), url.fragment()) {
        (Some(query), _) if !query.is_empty() => Parameters::from_query(query),
        (_, Some(fragment)) => Parameters::from_query(fragment),
        _ => Parameters::new(),
    }
}

// Negotiate command handler
pub mod negotiate {
    //! Prints what a challenge against an issuer would negotiate.

    use super::*;

    pub async fn run_negotiate(config: Config, issuer: &str) -> Result<()> {
        let issuer = parse_issuer(issuer)?;
        let relying_party = config.relying_party()?;
        let report = relying_party.negotiate(&issuer).await?;
        print_json(&serde_json::to_value(&report)?)
    }
}

// Challenge command handler
pub mod challenge {
    //! Builds an authorization request and prints its URL together with the
    //! request forgery protection value to pass back to `callback`.

    use super::*;
    use crate::pipeline::ChallengeDemand;
    use crate::service::ChallengeOutcome;

    pub async fn run_challenge(
        config: Config,
        issuer: Option<String>,
        scopes: Vec<String>,
        target_link_uri: Option<String>,
    ) -> Result<bool> {
        let demand = ChallengeDemand {
            issuer: issuer.as_deref().map(parse_issuer).transpose()?,
            scopes,
            target_link_uri,
            ..ChallengeDemand::default()
        };

        let relying_party = config.relying_party()?;
        match relying_party.challenge(demand).await? {
            ChallengeOutcome::Issued(challenge) => {
                print_json(&json!({
                    "status": "issued",
                    "authorization_url": challenge.request.to_url().as_str(),
                    "response_mode": challenge.request.response_mode,
                    "request_forgery_protection": challenge.request_forgery_protection,
                }))?;
                Ok(true)
            }
            ChallengeOutcome::Rejected(rejection) => {
                print_json(&json!({ "status": "rejected", "rejection": rejection }))?;
                Ok(false)
            }
            ChallengeOutcome::Handled => {
                print_json(&json!({ "status": "handled" }))?;
                Ok(false)
            }
            ChallengeOutcome::Skipped => {
                print_json(&json!({ "status": "skipped" }))?;
                Ok(false)
            }
        }
    }
}

// Callback command handler
pub mod callback {
    //! Runs the authentication pipeline on a redirection URL.

    use super::*;
    use crate::pipeline::AuthenticationRequest;
    use crate::service::AuthenticationOutcome;

    pub async fn run_callback(config: Config, url: &str, rfp: Option<String>) -> Result<bool> {
        let url = Url::parse(url)
            .map_err(|e| RpError::Config(format!("invalid callback URL '{}': {}", url, e)))?;

        let mut request = AuthenticationRequest::new(callback_parameters(&url));
        if let Some(rfp) = rfp {
            request = request.with_request_forgery_protection(rfp);
        }

        let relying_party = config.relying_party()?;
        match relying_party.authenticate(request).await? {
            AuthenticationOutcome::Authenticated(authentication) => {
                print_json(&json!({
                    "status": "authenticated",
                    "authentication": authentication,
                }))?;
                Ok(true)
            }
            AuthenticationOutcome::Rejected(rejection) => {
                print_json(&json!({ "status": "rejected", "rejection": rejection }))?;
                Ok(false)
            }
            AuthenticationOutcome::Handled => {
                print_json(&json!({ "status": "handled" }))?;
                Ok(false)
            }
            AuthenticationOutcome::Skipped => {
                print_json(&json!({ "status": "skipped" }))?;
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_parameters_from_query() {
        let url = Url::parse("https://app.example.com/callback?code=abc&state=xyz#ignored").unwrap();
        let parameters = callback_parameters(&url);
        assert_eq!(parameters.get("code"), Some("abc"));
        assert_eq!(parameters.get("state"), Some("xyz"));
    }

    #[test]
    fn test_callback_parameters_from_fragment() {
        let url = Url::parse("https://app.example.com/callback#id_token=jwt&state=xyz").unwrap();
        let parameters = callback_parameters(&url);
        assert_eq!(parameters.get("id_token"), Some("jwt"));
        assert_eq!(parameters.len(), 2);
    }

    #[test]
    fn test_callback_parameters_empty() {
        let url = Url::parse("https://app.example.com/callback").unwrap();
        assert!(callback_parameters(&url).is_empty());
    }

    #[test]
    fn test_parse_issuer_rejects_garbage() {
        assert!(parse_issuer("not a url").is_err());
    }
}
