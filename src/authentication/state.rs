//! State token phase
//!
//! Surfaces callback errors, validates the state token and restores the
//! values recorded at challenge time, then re-resolves the registration and
//! server configuration from the state token's issuer and checks them
//! against each other before any other token is looked at.

use std::sync::Arc;

use crate::authentication::ValidateSlotToken;
use crate::crypto::fixed_time_eq;
use crate::discovery::{ensure_issuer, issuer_matches, ConfigurationProvider};
use crate::error::{Rejection, Result, RpError};
use crate::pipeline::{
    require, Handler, HandlerDescriptor, PipelineContext, ProcessAuthenticationContext, TokenSlot,
};
use crate::protocol::{parameters, TokenKind};
use crate::registration::RegistrationStore;
use crate::service::Services;
use crate::state_token::StateTokenClaims;

const STATE_TOKEN_KINDS: &[TokenKind] = &[TokenKind::State];

pub(crate) fn handlers(services: &Services) -> Vec<HandlerDescriptor<ProcessAuthenticationContext>> {
    vec![
        HandlerDescriptor::from_fn(
            "validate_authorization_response_error",
            1_000,
            validate_authorization_response_error,
        ),
        HandlerDescriptor::from_fn("evaluate_state_token", 2_000, evaluate_state_token),
        HandlerDescriptor::from_fn("extract_state_token", 3_000, extract_state_token),
        HandlerDescriptor::from_fn("validate_required_state_token", 4_000, validate_required_state_token),
        HandlerDescriptor::new(
            "validate_state_token",
            5_000,
            ValidateSlotToken {
                tokens: Arc::clone(&services.tokens),
                kinds: STATE_TOKEN_KINDS,
                slot: state_token_slot,
            },
        )
        .with_filter(|context| context.state_token.needs_validation()),
        HandlerDescriptor::from_fn("restore_state_claims", 6_000, restore_state_claims),
        HandlerDescriptor::new(
            "resolve_client_registration",
            7_000,
            ResolveClientRegistration {
                registrations: Arc::clone(&services.registrations),
            },
        ),
        HandlerDescriptor::new(
            "resolve_configuration",
            8_000,
            ResolveConfiguration {
                configurations: Arc::clone(&services.configurations),
            },
        ),
        HandlerDescriptor::from_fn("validate_issuer_parameter", 9_000, validate_issuer_parameter),
        HandlerDescriptor::from_fn(
            "validate_request_forgery_protection",
            10_000,
            validate_request_forgery_protection,
        )
        .with_filter(|context| context.request_forgery_protection.is_some()),
    ]
}

fn state_token_slot(context: &mut ProcessAuthenticationContext) -> &mut TokenSlot {
    &mut context.state_token
}

fn validate_authorization_response_error(context: &mut ProcessAuthenticationContext) -> Result<()> {
    let Some(error) = context.request.get(parameters::ERROR) else {
        return Ok(());
    };

    let mut rejection = Rejection::new(error);
    if let Some(description) = context.request.get(parameters::ERROR_DESCRIPTION) {
        rejection = rejection.with_description(description);
    }
    if let Some(uri) = context.request.get(parameters::ERROR_URI) {
        rejection = rejection.with_uri(uri);
    }
    context.reject(rejection);
    Ok(())
}

fn evaluate_state_token(context: &mut ProcessAuthenticationContext) -> Result<()> {
    context.state_token.configure(true, true, true);
    Ok(())
}

fn extract_state_token(context: &mut ProcessAuthenticationContext) -> Result<()> {
    let state = context.request.get(parameters::STATE).map(str::to_string);
    context.state_token.extract_from(state.as_deref());
    Ok(())
}

fn validate_required_state_token(context: &mut ProcessAuthenticationContext) -> Result<()> {
    if context.state_token.is_missing() {
        context.reject(Rejection::invalid_request(
            "The mandatory 'state' parameter is missing.",
        ));
    }
    Ok(())
}

fn restore_state_claims(context: &mut ProcessAuthenticationContext) -> Result<()> {
    let principal = require(&context.state_token.principal, "the state token principal")?;
    let claims = StateTokenClaims::from_principal(principal)?;

    tracing::debug!(
        issuer = %claims.issuer,
        grant_type = %claims.grant_type,
        response_type = %claims.response_type,
        "Restored state token values"
    );
    context.issuer = Some(claims.issuer.clone());
    context.state = Some(claims);
    Ok(())
}

struct ResolveClientRegistration {
    registrations: Arc<RegistrationStore>,
}

#[async_trait::async_trait]
impl Handler<ProcessAuthenticationContext> for ResolveClientRegistration {
    async fn handle(&self, context: &mut ProcessAuthenticationContext) -> Result<()> {
        let issuer = require(&context.issuer, "the issuer")?;
        // The state token was issued by us for a registered issuer.
        let registration = self.registrations.find_by_issuer(issuer).ok_or_else(|| {
            RpError::InvariantViolation(format!(
                "the state token names {issuer} but no client registration matches it"
            ))
        })?;
        context.registration = Some(registration.clone());
        Ok(())
    }
}

struct ResolveConfiguration {
    configurations: Arc<dyn ConfigurationProvider>,
}

#[async_trait::async_trait]
impl Handler<ProcessAuthenticationContext> for ResolveConfiguration {
    async fn handle(&self, context: &mut ProcessAuthenticationContext) -> Result<()> {
        let issuer = require(&context.issuer, "the issuer")?.clone();
        let configuration = self.configurations.get_configuration(&issuer).await?;
        ensure_issuer(&configuration, &issuer)?;
        context.configuration = Some(configuration);
        Ok(())
    }
}

/// Authorization server issuer identification (RFC 9207).
fn validate_issuer_parameter(context: &mut ProcessAuthenticationContext) -> Result<()> {
    let issuer = require(&context.issuer, "the issuer")?;
    let configuration = require(&context.configuration, "the server configuration")?;

    let rejection = match (
        configuration.authorization_response_iss_parameter_supported,
        context.request.get(parameters::ISS),
    ) {
        (true, Some(iss)) if issuer_matches(iss, issuer) => None,
        (true, Some(_)) => Some(Rejection::invalid_request(
            "The 'iss' parameter does not match the expected issuer.",
        )),
        (true, None) => Some(Rejection::invalid_request(
            "The mandatory 'iss' parameter is missing.",
        )),
        (false, Some(_)) => Some(Rejection::invalid_request(
            "The 'iss' parameter is not supported by this authorization server.",
        )),
        (false, None) => None,
    };

    if let Some(rejection) = rejection {
        context.reject(rejection);
    }
    Ok(())
}

fn validate_request_forgery_protection(context: &mut ProcessAuthenticationContext) -> Result<()> {
    let state = require(&context.state, "the state token values")?;
    let valid = context
        .request_forgery_protection
        .as_deref()
        .map(|value| fixed_time_eq(value, &state.request_forgery_protection))
        .unwrap_or(false);
    if !valid {
        context.reject(Rejection::invalid_request(
            "The request forgery protection value does not match the state token.",
        ));
    }
    Ok(())
}
