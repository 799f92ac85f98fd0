//! Userinfo phase
//!
//! Fetches the userinfo claims when `openid` was requested, an access token
//! is available and the server advertises a userinfo endpoint. The subject
//! returned must be the one the identity tokens were issued for.

use std::sync::Arc;

use crate::authentication::ValidateSlotToken;
use crate::error::{Rejection, Result};
use crate::pipeline::{
    require, Handler, HandlerDescriptor, PipelineContext, ProcessAuthenticationContext, TokenSlot,
};
use crate::protocol::{claims, scopes, TokenKind};
use crate::service::Services;
use crate::transport::{Transport, UserinfoRequest};

const USERINFO_TOKEN_KINDS: &[TokenKind] = &[TokenKind::UserinfoToken];

pub(crate) fn handlers(services: &Services) -> Vec<HandlerDescriptor<ProcessAuthenticationContext>> {
    vec![
        HandlerDescriptor::from_fn("prepare_userinfo_request", 24_000, prepare_userinfo_request)
            .with_filter(userinfo_applies),
        HandlerDescriptor::new(
            "send_userinfo_request",
            25_000,
            SendUserinfoRequest {
                transport: Arc::clone(&services.transport),
            },
        )
        .with_filter(|context| context.userinfo_request.is_some()),
        HandlerDescriptor::from_fn("validate_userinfo_response", 26_000, validate_userinfo_response)
            .with_filter(|context| context.userinfo_response.is_some()),
        HandlerDescriptor::new(
            "validate_userinfo_token",
            27_000,
            ValidateSlotToken {
                tokens: Arc::clone(&services.tokens),
                kinds: USERINFO_TOKEN_KINDS,
                slot: userinfo_token_slot,
            },
        )
        .with_filter(|context| context.userinfo_token.needs_validation()),
        HandlerDescriptor::from_fn("validate_userinfo_subject", 28_000, validate_userinfo_subject)
            .with_filter(|context| {
                context.userinfo_token.principal.is_some() || context.userinfo_principal.is_some()
            }),
    ]
}

fn userinfo_token_slot(context: &mut ProcessAuthenticationContext) -> &mut TokenSlot {
    &mut context.userinfo_token
}

fn userinfo_applies(context: &ProcessAuthenticationContext) -> bool {
    let Some(state) = context.state_claims() else {
        return false;
    };
    let has_access_token = state.response_type.has_code() || state.response_type.has_token();
    let has_endpoint = context
        .configuration
        .as_ref()
        .map(|configuration| configuration.userinfo_endpoint.is_some())
        .unwrap_or(false);
    state.has_scope(scopes::OPENID) && has_access_token && has_endpoint
}

fn prepare_userinfo_request(context: &mut ProcessAuthenticationContext) -> Result<()> {
    let configuration = require(&context.configuration, "the server configuration")?;
    let endpoint = require(&configuration.userinfo_endpoint, "the userinfo endpoint")?.clone();

    let access_token = context
        .backchannel_access_token
        .token
        .as_ref()
        .or(context.frontchannel_access_token.token.as_ref())
        .cloned();

    match access_token {
        Some(access_token) => {
            tracing::debug!(endpoint = %endpoint, "Prepared userinfo request");
            context.userinfo_request = Some(UserinfoRequest {
                endpoint,
                access_token,
            });
        }
        None => tracing::debug!("No access token available, skipping userinfo request"),
    }
    Ok(())
}

struct SendUserinfoRequest {
    transport: Arc<dyn Transport>,
}

#[async_trait::async_trait]
impl Handler<ProcessAuthenticationContext> for SendUserinfoRequest {
    async fn handle(&self, context: &mut ProcessAuthenticationContext) -> Result<()> {
        let request = require(&context.userinfo_request, "the userinfo request")?.clone();
        let registration = require(&context.registration, "the client registration")?;
        let response = self
            .transport
            .send_userinfo_request(registration, request)
            .await?;
        context.userinfo_response = Some(response);
        Ok(())
    }
}

fn validate_userinfo_response(context: &mut ProcessAuthenticationContext) -> Result<()> {
    let response = require(&context.userinfo_response, "the userinfo response")?;
    if let Some(rejection) = response.parameters.error() {
        context.reject(rejection);
        return Ok(());
    }

    let token = response.token.clone();
    let principal = response.principal.clone();

    if token.is_some() {
        context.userinfo_token.configure(true, false, true);
        context.userinfo_token.extract_from(token.as_deref());
    }
    context.userinfo_principal = principal;
    Ok(())
}

fn validate_userinfo_subject(context: &mut ProcessAuthenticationContext) -> Result<()> {
    let openid = require(&context.state, "the state token values")?.has_scope(scopes::OPENID);
    if !openid {
        return Ok(());
    }

    let principal = context
        .userinfo_token
        .principal
        .as_ref()
        .or(context.userinfo_principal.as_ref());
    let Some(subject) = principal.and_then(|principal| principal.claim_str(claims::SUBJECT)) else {
        context.reject(Rejection::invalid_request(
            "The mandatory 'sub' claim is missing from the userinfo response.",
        ));
        return Ok(());
    };

    let identity_tokens = [
        context.frontchannel_identity_token.principal.as_ref(),
        context.backchannel_identity_token.principal.as_ref(),
    ];
    let mismatch = identity_tokens
        .into_iter()
        .flatten()
        .any(|identity| identity.claim_str(claims::SUBJECT) != Some(subject));

    if mismatch {
        context.reject(Rejection::invalid_request(
            "The 'sub' claim of the userinfo response does not match the identity token.",
        ));
    }
    Ok(())
}
