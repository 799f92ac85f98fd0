//! Frontchannel token phase
//!
//! Extracts the tokens returned on the callback itself. Which ones are
//! required follows from the response type recorded in the state token.
//! Authorization codes and access tokens are opaque here: only their
//! presence is checked. An identity token is always validated since the
//! nonce and digest checks depend on its claims.

use std::sync::Arc;

use crate::authentication::identity::{validate_identity_token, IdentityTokenExpectations};
use crate::authentication::ValidateSlotToken;
use crate::error::{Rejection, Result};
use crate::pipeline::{require, HandlerDescriptor, PipelineContext, ProcessAuthenticationContext, TokenSlot};
use crate::protocol::{parameters, TokenKind};
use crate::service::Services;

const IDENTITY_TOKEN_KINDS: &[TokenKind] = &[TokenKind::IdentityToken];

pub(crate) fn handlers(services: &Services) -> Vec<HandlerDescriptor<ProcessAuthenticationContext>> {
    vec![
        HandlerDescriptor::from_fn("evaluate_frontchannel_tokens", 11_000, evaluate_frontchannel_tokens),
        HandlerDescriptor::from_fn("extract_frontchannel_tokens", 12_000, extract_frontchannel_tokens),
        HandlerDescriptor::from_fn(
            "validate_required_frontchannel_tokens",
            13_000,
            validate_required_frontchannel_tokens,
        ),
        HandlerDescriptor::new(
            "validate_frontchannel_identity_token",
            14_000,
            ValidateSlotToken {
                tokens: Arc::clone(&services.tokens),
                kinds: IDENTITY_TOKEN_KINDS,
                slot: frontchannel_identity_token_slot,
            },
        )
        .with_filter(|context| context.frontchannel_identity_token.needs_validation()),
        HandlerDescriptor::from_fn(
            "validate_frontchannel_identity_token_claims",
            15_000,
            validate_frontchannel_identity_token_claims,
        )
        .with_filter(|context| context.frontchannel_identity_token.principal.is_some()),
    ]
}

fn frontchannel_identity_token_slot(context: &mut ProcessAuthenticationContext) -> &mut TokenSlot {
    &mut context.frontchannel_identity_token
}

fn evaluate_frontchannel_tokens(context: &mut ProcessAuthenticationContext) -> Result<()> {
    let response_type = require(&context.state, "the state token values")?.response_type;

    if response_type.has_code() {
        context.authorization_code.configure(true, true, false);
    }
    if response_type.has_token() {
        context.frontchannel_access_token.configure(true, true, false);
    }
    if response_type.has_id_token() {
        context.frontchannel_identity_token.configure(true, true, true);
    }
    Ok(())
}

fn extract_frontchannel_tokens(context: &mut ProcessAuthenticationContext) -> Result<()> {
    let code = context.request.get(parameters::CODE).map(str::to_string);
    let access_token = context.request.get(parameters::ACCESS_TOKEN).map(str::to_string);
    let identity_token = context.request.get(parameters::ID_TOKEN).map(str::to_string);

    context.authorization_code.extract_from(code.as_deref());
    context.frontchannel_access_token.extract_from(access_token.as_deref());
    context.frontchannel_identity_token.extract_from(identity_token.as_deref());
    Ok(())
}

fn validate_required_frontchannel_tokens(context: &mut ProcessAuthenticationContext) -> Result<()> {
    let slots = [
        (parameters::CODE, &context.authorization_code),
        (parameters::ACCESS_TOKEN, &context.frontchannel_access_token),
        (parameters::ID_TOKEN, &context.frontchannel_identity_token),
    ];
    let missing = slots
        .iter()
        .find(|(_, slot)| slot.is_missing())
        .map(|(name, _)| *name);

    if let Some(name) = missing {
        context.reject(Rejection::invalid_request(format!(
            "The mandatory '{name}' parameter is missing."
        )));
    }
    Ok(())
}

fn validate_frontchannel_identity_token_claims(context: &mut ProcessAuthenticationContext) -> Result<()> {
    let principal = require(
        &context.frontchannel_identity_token.principal,
        "the frontchannel identity token principal",
    )?;
    let state = require(&context.state, "the state token values")?;
    let registration = require(&context.registration, "the client registration")?;

    let expected = IdentityTokenExpectations {
        issuer: &state.issuer,
        client_id: &registration.client_id,
        nonce: state.nonce.as_deref(),
        authorization_code: context.authorization_code.token.as_deref(),
        access_token: context.frontchannel_access_token.token.as_deref(),
        require_token_hashes: true,
    };

    if let Err(rejection) = validate_identity_token(principal, &expected) {
        context.reject(rejection);
        return Ok(());
    }
    tracing::debug!("Frontchannel identity token accepted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{AuthenticationRequest, Signal};
    use crate::principal::Principal;
    use crate::protocol::{GrantType, Parameters, ResponseType};
    use crate::registration::ClientRegistration;
    use crate::state_token::StateTokenClaims;
    use serde_json::json;
    use url::Url;

    const CODE: &str = "Qcb0Orv1zh30vL1MPRsbm-diHiMwcLyZvn1arpZv-Jxf_11jnpEX3Tgfvk";

    fn issuer() -> Url {
        Url::parse("https://login.example.com/").unwrap()
    }

    fn callback(query: &str, response_type: ResponseType) -> ProcessAuthenticationContext {
        let mut context =
            ProcessAuthenticationContext::new(AuthenticationRequest::new(Parameters::from_query(query)));
        context.registration = Some(ClientRegistration::new(issuer(), "client-a"));
        context.state = Some(StateTokenClaims {
            issuer: issuer(),
            request_forgery_protection: "rfp".to_string(),
            target_link_uri: None,
            grant_type: GrantType::AuthorizationCode,
            response_type,
            redirect_uri: None,
            code_verifier: None,
            nonce: Some("n-0S6_WzA2Mj".to_string()),
            scopes: vec!["openid".to_string()],
            issued_at: None,
            expires_at: None,
        });
        context
    }

    fn identity_token(c_hash: &str) -> Principal {
        Principal::from_value(json!({
            "iss": "https://login.example.com/",
            "sub": "alice",
            "aud": "client-a",
            "exp": 1_900_000_000,
            "iat": 1_700_000_000,
            "nonce": "n-0S6_WzA2Mj",
            "c_hash": c_hash
        }))
        .unwrap()
        .with_algorithm("RS256")
    }

    fn run_extraction(context: &mut ProcessAuthenticationContext) {
        evaluate_frontchannel_tokens(context).unwrap();
        extract_frontchannel_tokens(context).unwrap();
        validate_required_frontchannel_tokens(context).unwrap();
    }

    #[test]
    fn test_code_flow_requires_code_only() {
        let mut context = callback("code=abc&id_token=ignored", ResponseType::CODE);
        run_extraction(&mut context);
        assert!(!context.is_rejected());
        assert_eq!(context.authorization_code.token.as_deref(), Some("abc"));
        assert!(context.frontchannel_identity_token.token.is_none());
    }

    #[test]
    fn test_missing_required_token_is_named() {
        let mut context = callback("code=abc", ResponseType::CODE_ID_TOKEN);
        run_extraction(&mut context);
        match context.signal() {
            Signal::Rejected(rejection) => {
                assert!(rejection.description.as_deref().unwrap().contains("'id_token'"))
            }
            other => panic!("expected a rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_hybrid_identity_token_marked_for_validation() {
        let mut context = callback("code=abc&id_token=jwt", ResponseType::CODE_ID_TOKEN);
        run_extraction(&mut context);
        assert!(context.frontchannel_identity_token.needs_validation());
        assert!(!context.authorization_code.needs_validation());
    }

    #[test]
    fn test_hybrid_c_hash_accepted_and_tampered_rejected() {
        let query = format!("code={CODE}&id_token=jwt");

        let mut context = callback(&query, ResponseType::CODE_ID_TOKEN);
        run_extraction(&mut context);
        context
            .frontchannel_identity_token
            .accept(identity_token("LDktKdoQak3Pk0cnXxCltA"));
        validate_frontchannel_identity_token_claims(&mut context).unwrap();
        assert!(!context.is_rejected());

        let mut context = callback(&query, ResponseType::CODE_ID_TOKEN);
        run_extraction(&mut context);
        context
            .frontchannel_identity_token
            .accept(identity_token("AAAAAAAAAAAAAAAAAAAAAA"));
        validate_frontchannel_identity_token_claims(&mut context).unwrap();
        match context.signal() {
            Signal::Rejected(rejection) => {
                assert_eq!(rejection.error, "invalid_request");
                assert!(rejection.description.as_deref().unwrap().contains("c_hash"));
            }
            other => panic!("expected a rejection, got {other:?}"),
        }
    }
}
