//! Challenge pipeline
//!
//! Turns a [`ChallengeDemand`](crate::pipeline::ChallengeDemand) into the
//! parameters of an authorization request. Handlers, in order:
//!
//! | Order | Handler |
//! |---|---|
//! | 1000 | validate the demand |
//! | 2000 | resolve the issuer |
//! | 3000 | resolve the client registration |
//! | 4000 | resolve and cross-check the server configuration |
//! | 5000 | negotiate the grant type |
//! | 6000 | decide which tokens to generate |
//! | 7000 | negotiate the response type |
//! | 8000 | negotiate the response mode |
//! | 9000 | attach client id and redirect URI |
//! | 10000 | attach scopes |
//! | 11000 | generate the request-forgery-protection value |
//! | 12000 | generate the nonce |
//! | 13000 | generate the PKCE verifier and challenge |
//! | 14000 | prepare the state token principal |
//! | 15000 | generate the state token |
//! | 16000 | require a redirect URI for OpenID Connect |
//! | 17000 | assemble the request parameters |

use std::sync::Arc;

use crate::crypto::{self, RANDOM_VALUE_LENGTH};
use crate::discovery::{ensure_issuer, ConfigurationProvider};
use crate::error::{Rejection, Result, RpError};
use crate::negotiation::{
    is_mutually_supported, is_response_type_compatible, negotiate_code_challenge_method,
    negotiate_grant_type, negotiate_response_mode, negotiate_response_type, Negotiated,
};
use crate::pipeline::{
    require, Handler, HandlerDescriptor, PipelineContext, ProcessChallengeContext,
};
use crate::protocol::{parameters, scopes, GrantType, TokenKind};
use crate::registration::RegistrationStore;
use crate::service::Services;
use crate::state_token::{base_principal, StateTokenClaims};
use crate::tokens::TokenDispatcher;

/// Builds the built-in challenge handlers.
pub fn handlers(services: &Services) -> Vec<HandlerDescriptor<ProcessChallengeContext>> {
    vec![
        HandlerDescriptor::from_fn("validate_challenge_demand", 1_000, validate_challenge_demand),
        HandlerDescriptor::new(
            "resolve_issuer",
            2_000,
            ResolveIssuer {
                registrations: Arc::clone(&services.registrations),
            },
        ),
        HandlerDescriptor::new(
            "resolve_client_registration",
            3_000,
            ResolveClientRegistration {
                registrations: Arc::clone(&services.registrations),
            },
        ),
        HandlerDescriptor::new(
            "resolve_configuration",
            4_000,
            ResolveConfiguration {
                configurations: Arc::clone(&services.configurations),
            },
        ),
        HandlerDescriptor::from_fn("attach_grant_type", 5_000, attach_grant_type),
        HandlerDescriptor::from_fn("evaluate_generated_tokens", 6_000, evaluate_generated_tokens),
        HandlerDescriptor::from_fn("attach_response_type", 7_000, attach_response_type)
            .with_filter(|context| context.grant_type.is_some()),
        HandlerDescriptor::from_fn("attach_response_mode", 8_000, attach_response_mode)
            .with_filter(|context| context.response_type.is_some()),
        HandlerDescriptor::from_fn("attach_client_identity", 9_000, attach_client_identity),
        HandlerDescriptor::from_fn("attach_scopes", 10_000, attach_scopes),
        HandlerDescriptor::from_fn(
            "attach_request_forgery_protection",
            11_000,
            attach_request_forgery_protection,
        ),
        HandlerDescriptor::from_fn("attach_nonce", 12_000, attach_nonce),
        HandlerDescriptor::from_fn("attach_code_challenge", 13_000, attach_code_challenge)
            .with_filter(|context| {
                context
                    .response_type
                    .map(|response_type| response_type.has_code())
                    .unwrap_or(false)
            }),
        HandlerDescriptor::from_fn(
            "prepare_state_token_principal",
            14_000,
            prepare_state_token_principal,
        )
        .with_filter(|context| context.generate_state_token),
        HandlerDescriptor::new(
            "generate_state_token",
            15_000,
            GenerateStateToken {
                tokens: Arc::clone(&services.tokens),
            },
        )
        .with_filter(|context| context.generate_state_token),
        HandlerDescriptor::from_fn("validate_redirect_uri", 16_000, validate_redirect_uri),
        HandlerDescriptor::from_fn(
            "attach_challenge_parameters",
            17_000,
            attach_challenge_parameters,
        ),
    ]
}

// ---------------------------------------------------------------------------
// Demand, issuer, registration, configuration
// ---------------------------------------------------------------------------

fn validate_challenge_demand(context: &mut ProcessChallengeContext) -> Result<()> {
    if let Some(grant_type) = context.demand.grant_type.as_deref() {
        if grant_type.parse::<GrantType>().is_err() {
            context.reject(Rejection::invalid_request(format!(
                "The '{grant_type}' grant type is not supported for interactive challenges."
            )));
        }
    }
    Ok(())
}

struct ResolveIssuer {
    registrations: Arc<RegistrationStore>,
}

#[async_trait::async_trait]
impl Handler<ProcessChallengeContext> for ResolveIssuer {
    async fn handle(&self, context: &mut ProcessChallengeContext) -> Result<()> {
        let issuer = match (&context.demand.issuer, self.registrations.sole()) {
            (Some(issuer), _) => issuer.clone(),
            (None, Some(registration)) => registration.issuer.clone(),
            (None, None) => {
                return Err(RpError::Config(format!(
                    "no issuer was specified and {} client registrations are configured",
                    self.registrations.len()
                ))
                .into())
            }
        };
        tracing::debug!(issuer = %issuer, "Resolved issuer");
        context.issuer = Some(issuer);
        Ok(())
    }
}

struct ResolveClientRegistration {
    registrations: Arc<RegistrationStore>,
}

#[async_trait::async_trait]
impl Handler<ProcessChallengeContext> for ResolveClientRegistration {
    async fn handle(&self, context: &mut ProcessChallengeContext) -> Result<()> {
        let issuer = require(&context.issuer, "the issuer")?;
        let registration = self.registrations.find_by_issuer(issuer).ok_or_else(|| {
            RpError::Config(format!("no client registration matches the issuer {issuer}"))
        })?;
        context.registration = Some(registration.clone());
        Ok(())
    }
}

struct ResolveConfiguration {
    configurations: Arc<dyn ConfigurationProvider>,
}

#[async_trait::async_trait]
impl Handler<ProcessChallengeContext> for ResolveConfiguration {
    async fn handle(&self, context: &mut ProcessChallengeContext) -> Result<()> {
        let issuer = require(&context.issuer, "the issuer")?.clone();
        let configuration = self.configurations.get_configuration(&issuer).await?;
        ensure_issuer(&configuration, &issuer)?;
        if configuration.authorization_endpoint.is_none() {
            return Err(RpError::Config(format!(
                "the server configuration of {issuer} has no authorization endpoint"
            ))
            .into());
        }
        context.configuration = Some(configuration);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Negotiation
// ---------------------------------------------------------------------------

fn attach_grant_type(context: &mut ProcessChallengeContext) -> Result<()> {
    let registration = require(&context.registration, "the client registration")?;
    let configuration = require(&context.configuration, "the server configuration")?;

    let grant_type = match context.demand.grant_type.as_deref() {
        Some(explicit) => {
            if !is_mutually_supported(
                &registration.grant_types,
                &configuration.grant_types_supported,
                explicit,
            ) {
                return Err(RpError::Negotiation(format!(
                    "the '{explicit}' grant type is not supported by both the client and {}",
                    configuration.issuer
                ))
                .into());
            }
            explicit
                .parse::<GrantType>()
                .map_err(|e| RpError::InvariantViolation(e.to_string()))?
        }
        None => match negotiate_grant_type(
            &registration.grant_types,
            &configuration.grant_types_supported,
        ) {
            Negotiated::Selected(grant_type) => grant_type,
            Negotiated::NoAgreement => {
                return Err(RpError::Negotiation(format!(
                    "no grant type is supported by both the client and {}",
                    configuration.issuer
                ))
                .into())
            }
        },
    };

    tracing::debug!(grant_type = %grant_type, "Negotiated grant type");
    context.grant_type = Some(grant_type);
    Ok(())
}

fn evaluate_generated_tokens(context: &mut ProcessChallengeContext) -> Result<()> {
    context.generate_state_token = matches!(
        context.grant_type,
        Some(GrantType::AuthorizationCode) | Some(GrantType::Implicit)
    );
    Ok(())
}

fn attach_response_type(context: &mut ProcessChallengeContext) -> Result<()> {
    let grant_type = *require(&context.grant_type, "the grant type")?;
    let registration = require(&context.registration, "the client registration")?;
    let configuration = require(&context.configuration, "the server configuration")?;

    match negotiate_response_type(
        grant_type,
        &registration.response_types,
        &configuration.response_types_supported,
    ) {
        Negotiated::Selected(response_type) => {
            debug_assert!(is_response_type_compatible(grant_type, response_type));
            tracing::debug!(response_type = %response_type, "Negotiated response type");
            context.response_type = Some(response_type);
            Ok(())
        }
        Negotiated::NoAgreement => Err(RpError::Negotiation(format!(
            "no response type compatible with the {grant_type} grant is supported by both the client and {}",
            configuration.issuer
        ))
        .into()),
    }
}

fn attach_response_mode(context: &mut ProcessChallengeContext) -> Result<()> {
    let response_type = *require(&context.response_type, "the response type")?;
    let registration = require(&context.registration, "the client registration")?;
    let configuration = require(&context.configuration, "the server configuration")?;

    match negotiate_response_mode(
        response_type,
        &registration.response_modes,
        &configuration.response_modes_supported,
    ) {
        Negotiated::Selected(response_mode) => {
            tracing::debug!(response_mode = %response_mode, "Negotiated response mode");
            context.response_mode = Some(response_mode);
            Ok(())
        }
        Negotiated::NoAgreement => Err(RpError::Negotiation(format!(
            "no response mode is supported by both the client and {}",
            configuration.issuer
        ))
        .into()),
    }
}

// ---------------------------------------------------------------------------
// Request values
// ---------------------------------------------------------------------------

fn attach_client_identity(context: &mut ProcessChallengeContext) -> Result<()> {
    let registration = require(&context.registration, "the client registration")?;
    context.client_id = Some(registration.client_id.clone());
    context.redirect_uri = registration.redirect_uri.clone();
    Ok(())
}

fn attach_scopes(context: &mut ProcessChallengeContext) -> Result<()> {
    let registration = require(&context.registration, "the client registration")?;
    let requested = if context.demand.scopes.is_empty() {
        registration.scopes.clone()
    } else {
        context.demand.scopes.clone()
    };
    for scope in requested.iter().filter(|scope| !scope.is_empty()) {
        context.add_scope(scope);
    }

    if context
        .response_type
        .map(|response_type| response_type.has_id_token())
        .unwrap_or(false)
    {
        context.add_scope(scopes::OPENID);
    }

    tracing::debug!(scopes = ?context.scopes, "Attached scopes");
    Ok(())
}

fn attach_request_forgery_protection(context: &mut ProcessChallengeContext) -> Result<()> {
    context.request_forgery_protection = Some(crypto::random_token(RANDOM_VALUE_LENGTH));
    Ok(())
}

fn attach_nonce(context: &mut ProcessChallengeContext) -> Result<()> {
    let configuration = require(&context.configuration, "the server configuration")?;
    let server_supports_openid = configuration
        .scopes_supported
        .iter()
        .any(|scope| scope == scopes::OPENID);
    if context.has_scope(scopes::OPENID) || server_supports_openid {
        context.nonce = Some(crypto::random_token(RANDOM_VALUE_LENGTH));
    }
    Ok(())
}

fn attach_code_challenge(context: &mut ProcessChallengeContext) -> Result<()> {
    let registration = require(&context.registration, "the client registration")?;
    let configuration = require(&context.configuration, "the server configuration")?;

    match negotiate_code_challenge_method(
        &registration.code_challenge_methods,
        &configuration.code_challenge_methods_supported,
    ) {
        Negotiated::Selected(Some(method)) => {
            let verifier = crypto::random_token(RANDOM_VALUE_LENGTH);
            context.code_challenge = Some(crypto::code_challenge(&verifier, method));
            context.code_challenge_method = Some(method);
            context.code_verifier = Some(verifier);
            tracing::debug!(method = %method, "Attached PKCE code challenge");
            Ok(())
        }
        Negotiated::Selected(None) => {
            tracing::debug!("Server declares no PKCE method, omitting code challenge");
            Ok(())
        }
        Negotiated::NoAgreement => Err(RpError::Negotiation(format!(
            "no code challenge method is supported by both the client and {}",
            configuration.issuer
        ))
        .into()),
    }
}

// ---------------------------------------------------------------------------
// State token
// ---------------------------------------------------------------------------

fn prepare_state_token_principal(context: &mut ProcessChallengeContext) -> Result<()> {
    let claims = StateTokenClaims {
        issuer: require(&context.issuer, "the issuer")?.clone(),
        request_forgery_protection: require(
            &context.request_forgery_protection,
            "the request forgery protection",
        )?
        .clone(),
        target_link_uri: context.demand.target_link_uri.clone(),
        grant_type: *require(&context.grant_type, "the grant type")?,
        response_type: *require(&context.response_type, "the response type")?,
        redirect_uri: context.redirect_uri.clone(),
        code_verifier: context.code_verifier.clone(),
        nonce: context.nonce.clone(),
        scopes: context.scopes.clone(),
        issued_at: None,
        expires_at: None,
    };

    let mut principal = base_principal(context.demand.principal.as_ref());
    claims.apply_to(&mut principal);
    context.state_token_principal = Some(principal);
    Ok(())
}

struct GenerateStateToken {
    tokens: Arc<dyn TokenDispatcher>,
}

#[async_trait::async_trait]
impl Handler<ProcessChallengeContext> for GenerateStateToken {
    async fn handle(&self, context: &mut ProcessChallengeContext) -> Result<()> {
        let principal = require(&context.state_token_principal, "the state token principal")?;
        match self.tokens.generate_token(principal, TokenKind::State).await? {
            Ok(token) => {
                tracing::debug!("Generated state token");
                context.state_token = Some(token);
            }
            Err(rejection) => context.reject(rejection),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Legality and assembly
// ---------------------------------------------------------------------------

fn validate_redirect_uri(context: &mut ProcessChallengeContext) -> Result<()> {
    if context.has_scope(scopes::OPENID) && context.redirect_uri.is_none() {
        return Err(RpError::Config(
            "OpenID Connect requests require a redirect_uri but the client registration has none"
                .to_string(),
        )
        .into());
    }
    Ok(())
}

fn attach_challenge_parameters(context: &mut ProcessChallengeContext) -> Result<()> {
    let mut outbound = std::mem::take(&mut context.parameters);

    if let Some(client_id) = &context.client_id {
        outbound.insert(parameters::CLIENT_ID, client_id.as_str());
    }
    if let Some(redirect_uri) = &context.redirect_uri {
        outbound.insert(parameters::REDIRECT_URI, redirect_uri.as_str());
    }
    if let Some(response_type) = context.response_type {
        outbound.insert(parameters::RESPONSE_TYPE, response_type.to_string());
    }
    if let Some(response_mode) = context.response_mode {
        outbound.insert(parameters::RESPONSE_MODE, response_mode.as_str());
    }
    if !context.scopes.is_empty() {
        outbound.insert(parameters::SCOPE, context.scopes.join(" "));
    }
    if let Some(state_token) = &context.state_token {
        outbound.insert(parameters::STATE, state_token.as_str());
    }
    if let Some(nonce) = &context.nonce {
        outbound.insert(parameters::NONCE, nonce.as_str());
    }
    if let (Some(challenge), Some(method)) = (&context.code_challenge, context.code_challenge_method) {
        outbound.insert(parameters::CODE_CHALLENGE, challenge.as_str());
        outbound.insert(parameters::CODE_CHALLENGE_METHOD, method.as_str());
    }

    for (name, value) in context.demand.parameters.iter() {
        if !outbound.contains(name) {
            outbound.insert(name, value);
        }
    }

    context.parameters = outbound;
    Ok(())
}
