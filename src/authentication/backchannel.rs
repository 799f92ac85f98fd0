//! Backchannel token phase
//!
//! Redeems the authorization code at the token endpoint. Runs only when a
//! code was extracted from the callback. The access token is always
//! required; the identity token only when `openid` was requested.

use std::sync::Arc;

use crate::authentication::identity::{
    validate_identity_token, validate_same_subject, IdentityTokenExpectations,
};
use crate::authentication::ValidateSlotToken;
use crate::error::{Rejection, Result, RpError};
use crate::negotiation::{negotiate_client_authentication_method, Negotiated};
use crate::pipeline::{
    require, Handler, HandlerDescriptor, PipelineContext, ProcessAuthenticationContext, TokenSlot,
};
use crate::protocol::{errors, parameters, scopes, GrantType, Parameters, TokenKind};
use crate::service::Services;
use crate::transport::{TokenRequest, Transport};

const IDENTITY_TOKEN_KINDS: &[TokenKind] = &[TokenKind::IdentityToken];

pub(crate) fn handlers(services: &Services) -> Vec<HandlerDescriptor<ProcessAuthenticationContext>> {
    vec![
        HandlerDescriptor::from_fn("evaluate_backchannel_tokens", 16_000, evaluate_backchannel_tokens)
            .with_filter(|context| context.authorization_code.token.is_some()),
        HandlerDescriptor::from_fn("prepare_token_request", 17_000, prepare_token_request)
            .with_filter(|context| context.authorization_code.token.is_some()),
        HandlerDescriptor::new(
            "send_token_request",
            18_000,
            SendTokenRequest {
                transport: Arc::clone(&services.transport),
            },
        )
        .with_filter(|context| context.token_request.is_some()),
        HandlerDescriptor::from_fn("validate_token_response", 19_000, validate_token_response)
            .with_filter(|context| context.token_response.is_some()),
        HandlerDescriptor::from_fn("extract_backchannel_tokens", 20_000, extract_backchannel_tokens)
            .with_filter(|context| context.token_response.is_some()),
        HandlerDescriptor::from_fn(
            "validate_required_backchannel_tokens",
            21_000,
            validate_required_backchannel_tokens,
        )
        .with_filter(|context| context.token_response.is_some()),
        HandlerDescriptor::new(
            "validate_backchannel_identity_token",
            22_000,
            ValidateSlotToken {
                tokens: Arc::clone(&services.tokens),
                kinds: IDENTITY_TOKEN_KINDS,
                slot: backchannel_identity_token_slot,
            },
        )
        .with_filter(|context| context.backchannel_identity_token.needs_validation()),
        HandlerDescriptor::from_fn(
            "validate_backchannel_identity_token_claims",
            23_000,
            validate_backchannel_identity_token_claims,
        )
        .with_filter(|context| context.backchannel_identity_token.principal.is_some()),
    ]
}

fn backchannel_identity_token_slot(context: &mut ProcessAuthenticationContext) -> &mut TokenSlot {
    &mut context.backchannel_identity_token
}

fn evaluate_backchannel_tokens(context: &mut ProcessAuthenticationContext) -> Result<()> {
    let openid = require(&context.state, "the state token values")?.has_scope(scopes::OPENID);

    context.backchannel_access_token.configure(true, true, false);
    context.backchannel_identity_token.configure(true, openid, true);
    context.refresh_token.configure(true, false, false);
    Ok(())
}

fn prepare_token_request(context: &mut ProcessAuthenticationContext) -> Result<()> {
    let state = require(&context.state, "the state token values")?;
    let registration = require(&context.registration, "the client registration")?;
    let configuration = require(&context.configuration, "the server configuration")?;
    let code = require(&context.authorization_code.token, "the authorization code")?;

    let endpoint = configuration.token_endpoint.clone().ok_or_else(|| {
        RpError::Config(format!(
            "the server configuration of {} has no token endpoint",
            configuration.issuer
        ))
    })?;

    let authentication_method = match negotiate_client_authentication_method(
        &registration.client_authentication_methods,
        &configuration.token_endpoint_auth_methods_supported,
        registration.client_secret.is_some(),
    ) {
        Negotiated::Selected(method) => method,
        Negotiated::NoAgreement => {
            return Err(RpError::Negotiation(format!(
                "no client authentication method is supported by both the client and {}",
                configuration.issuer
            ))
            .into())
        }
    };

    // Hybrid flows recorded as implicit still redeem their code with the
    // authorization code grant.
    let mut request_parameters = Parameters::new();
    request_parameters.insert(parameters::GRANT_TYPE, GrantType::AuthorizationCode.as_str());
    request_parameters.insert(parameters::CODE, code.as_str());
    if let Some(redirect_uri) = &state.redirect_uri {
        request_parameters.insert(parameters::REDIRECT_URI, redirect_uri.as_str());
    }
    if let Some(code_verifier) = &state.code_verifier {
        request_parameters.insert(parameters::CODE_VERIFIER, code_verifier.as_str());
    }

    tracing::debug!(
        endpoint = %endpoint,
        authentication_method = %authentication_method,
        "Prepared token request"
    );
    context.token_request = Some(TokenRequest {
        endpoint,
        authentication_method,
        parameters: request_parameters,
    });
    Ok(())
}

struct SendTokenRequest {
    transport: Arc<dyn Transport>,
}

#[async_trait::async_trait]
impl Handler<ProcessAuthenticationContext> for SendTokenRequest {
    async fn handle(&self, context: &mut ProcessAuthenticationContext) -> Result<()> {
        let request = require(&context.token_request, "the token request")?.clone();
        let registration = require(&context.registration, "the client registration")?;
        let response = self.transport.send_token_request(registration, request).await?;
        context.token_response = Some(response);
        Ok(())
    }
}

fn validate_token_response(context: &mut ProcessAuthenticationContext) -> Result<()> {
    let response = require(&context.token_response, "the token response")?;
    if let Some(rejection) = response.parameters.error() {
        context.reject(rejection);
    }
    Ok(())
}

fn extract_backchannel_tokens(context: &mut ProcessAuthenticationContext) -> Result<()> {
    let response = require(&context.token_response, "the token response")?;
    let access_token = response.parameters.get_str(parameters::ACCESS_TOKEN).map(str::to_string);
    let identity_token = response.parameters.get_str(parameters::ID_TOKEN).map(str::to_string);
    let refresh_token = response.parameters.get_str(parameters::REFRESH_TOKEN).map(str::to_string);

    context.backchannel_access_token.extract_from(access_token.as_deref());
    context.backchannel_identity_token.extract_from(identity_token.as_deref());
    context.refresh_token.extract_from(refresh_token.as_deref());
    Ok(())
}

fn validate_required_backchannel_tokens(context: &mut ProcessAuthenticationContext) -> Result<()> {
    let slots = [
        (parameters::ACCESS_TOKEN, &context.backchannel_access_token),
        (parameters::ID_TOKEN, &context.backchannel_identity_token),
        (parameters::REFRESH_TOKEN, &context.refresh_token),
    ];
    let missing = slots
        .iter()
        .find(|(_, slot)| slot.is_missing())
        .map(|(name, _)| *name);

    if let Some(name) = missing {
        context.reject(Rejection::new(errors::SERVER_ERROR).with_description(format!(
            "The token response does not contain the mandatory '{name}' parameter."
        )));
    }
    Ok(())
}

fn validate_backchannel_identity_token_claims(context: &mut ProcessAuthenticationContext) -> Result<()> {
    let principal = require(
        &context.backchannel_identity_token.principal,
        "the backchannel identity token principal",
    )?;
    let state = require(&context.state, "the state token values")?;
    let registration = require(&context.registration, "the client registration")?;

    let expected = IdentityTokenExpectations {
        issuer: &state.issuer,
        client_id: &registration.client_id,
        nonce: state.nonce.as_deref(),
        authorization_code: None,
        access_token: context.backchannel_access_token.token.as_deref(),
        require_token_hashes: false,
    };

    let mut verdict = validate_identity_token(principal, &expected);
    if verdict.is_ok() {
        if let Some(frontchannel) = &context.frontchannel_identity_token.principal {
            verdict = validate_same_subject(frontchannel, principal);
        }
    }

    match verdict {
        Ok(()) => tracing::debug!("Backchannel identity token accepted"),
        Err(rejection) => context.reject(rejection),
    }
    Ok(())
}
