//! Relying party façade
//!
//! [`RelyingParty`] owns the collaborators and both pipelines. Hosts call
//! [`RelyingParty::challenge`] to start an authorization and
//! [`RelyingParty::authenticate`] when the callback comes back.

use std::sync::Arc;

use serde::Serialize;
use url::Url;

use crate::discovery::ConfigurationProvider;
use crate::error::{Rejection, Result, RpError};
use crate::negotiation::{
    negotiate_client_authentication_method, negotiate_code_challenge_method, negotiate_grant_type,
    negotiate_response_mode, negotiate_response_type, Negotiated,
};
use crate::pipeline::{
    AuthenticationRequest, ChallengeDemand, HandlerDescriptor, Pipeline, PipelineOutcome,
    ProcessAuthenticationContext, ProcessChallengeContext,
};
use crate::principal::Principal;
use crate::protocol::{Parameters, ResponseMode};
use crate::registration::RegistrationStore;
use crate::tokens::TokenDispatcher;
use crate::transport::Transport;
use crate::{authentication, challenge};

/// Collaborators shared by every handler.
#[derive(Debug, Clone)]
pub struct Services {
    pub registrations: Arc<RegistrationStore>,
    pub configurations: Arc<dyn ConfigurationProvider>,
    pub tokens: Arc<dyn TokenDispatcher>,
    pub transport: Arc<dyn Transport>,
}

/// An authorization request ready to be sent to the user agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthorizationRequest {
    pub endpoint: Url,
    pub response_mode: ResponseMode,
    pub parameters: Parameters,
}

impl AuthorizationRequest {
    /// The authorization endpoint with the request parameters appended to
    /// its query.
    pub fn to_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            for (name, value) in self.parameters.iter() {
                query.append_pair(name, value);
            }
        }
        url
    }
}

/// A successful challenge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Challenge {
    pub request: AuthorizationRequest,
    /// Value the host binds to the user agent and passes back on
    /// authentication.
    pub request_forgery_protection: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChallengeOutcome {
    Issued(Box<Challenge>),
    Rejected(Rejection),
    /// A host handler took over the request; no request was built.
    Handled,
    /// A host handler stopped the pipeline without producing a request.
    Skipped,
}

/// Tokens obtained during authentication.
#[derive(Clone, Default, PartialEq, Serialize)]
pub struct AuthenticationTokens {
    pub access_token: Option<String>,
    pub identity_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for AuthenticationTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationTokens")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("identity_token", &self.identity_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A successful authentication.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Authentication {
    pub issuer: Url,
    pub principal: Principal,
    pub target_link_uri: Option<String>,
    pub scopes: Vec<String>,
    #[serde(skip)]
    pub tokens: AuthenticationTokens,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthenticationOutcome {
    Authenticated(Box<Authentication>),
    Rejected(Rejection),
    /// A host handler took over the callback; no principal was assembled.
    Handled,
    Skipped,
}

/// What a challenge against an issuer would negotiate. `None` marks a
/// parameter the client and server do not agree on.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NegotiationReport {
    pub issuer: String,
    pub grant_type: Option<String>,
    pub response_type: Option<String>,
    pub response_mode: Option<String>,
    /// `Some("")` when the server declares no PKCE method.
    pub code_challenge_method: Option<String>,
    pub client_authentication_method: Option<String>,
}

/// OAuth 2.0 / OpenID Connect relying party.
#[derive(Debug)]
pub struct RelyingParty {
    services: Services,
    challenge: Pipeline<ProcessChallengeContext>,
    authentication: Pipeline<ProcessAuthenticationContext>,
}

impl RelyingParty {
    pub fn new(services: Services) -> Self {
        let challenge = Pipeline::new(challenge::handlers(&services));
        let authentication = Pipeline::new(authentication::handlers(&services));
        Self {
            services,
            challenge,
            authentication,
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Adds a host handler to the challenge pipeline.
    pub fn add_challenge_handler(&mut self, descriptor: HandlerDescriptor<ProcessChallengeContext>) {
        self.challenge.add(descriptor);
    }

    /// Adds a host handler to the authentication pipeline.
    pub fn add_authentication_handler(
        &mut self,
        descriptor: HandlerDescriptor<ProcessAuthenticationContext>,
    ) {
        self.authentication.add(descriptor);
    }

    /// Builds an authorization request.
    ///
    /// # Errors
    ///
    /// Returns an error when the registration or server configuration
    /// cannot support the demand (no agreement, missing endpoint) or a
    /// collaborator fails.
    pub async fn challenge(&self, demand: ChallengeDemand) -> Result<ChallengeOutcome> {
        let mut context = ProcessChallengeContext::new(demand);

        match self.challenge.execute(&mut context).await? {
            PipelineOutcome::Completed => {}
            PipelineOutcome::Handled => return Ok(ChallengeOutcome::Handled),
            PipelineOutcome::Skipped => return Ok(ChallengeOutcome::Skipped),
            PipelineOutcome::Rejected(rejection) => return Ok(ChallengeOutcome::Rejected(rejection)),
        }

        let endpoint = context
            .configuration
            .as_ref()
            .and_then(|configuration| configuration.authorization_endpoint.clone())
            .ok_or_else(|| {
                RpError::InvariantViolation(
                    "the challenge completed without an authorization endpoint".to_string(),
                )
            })?;

        tracing::info!(
            issuer = context.issuer.as_ref().map(Url::as_str).unwrap_or_default(),
            response_type = context.response_type.map(|r| r.to_string()).unwrap_or_default(),
            "Challenge completed"
        );

        Ok(ChallengeOutcome::Issued(Box::new(Challenge {
            request: AuthorizationRequest {
                endpoint,
                response_mode: context.response_mode.unwrap_or(ResponseMode::Query),
                parameters: context.parameters,
            },
            request_forgery_protection: context.request_forgery_protection,
        })))
    }

    /// Processes a callback received on the redirection endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error on invariant violations (for example a server
    /// configuration reporting another issuer than the state token) and
    /// collaborator failures. Protocol failures are returned as
    /// [`AuthenticationOutcome::Rejected`].
    pub async fn authenticate(&self, request: AuthenticationRequest) -> Result<AuthenticationOutcome> {
        let mut context = ProcessAuthenticationContext::new(request);

        match self.authentication.execute(&mut context).await? {
            PipelineOutcome::Completed => {}
            PipelineOutcome::Handled => return Ok(AuthenticationOutcome::Handled),
            PipelineOutcome::Skipped => return Ok(AuthenticationOutcome::Skipped),
            PipelineOutcome::Rejected(rejection) => {
                return Ok(AuthenticationOutcome::Rejected(rejection))
            }
        }

        let state = context.state.take().ok_or_else(|| {
            RpError::InvariantViolation(
                "the authentication completed without state token values".to_string(),
            )
        })?;
        let principal = context.principal.take().unwrap_or_default();

        let tokens = AuthenticationTokens {
            access_token: context
                .backchannel_access_token
                .token
                .take()
                .or(context.frontchannel_access_token.token.take()),
            identity_token: context
                .backchannel_identity_token
                .token
                .take()
                .or(context.frontchannel_identity_token.token.take()),
            refresh_token: context.refresh_token.token.take(),
        };

        tracing::info!(issuer = %state.issuer, "Authentication completed");

        Ok(AuthenticationOutcome::Authenticated(Box::new(Authentication {
            issuer: state.issuer,
            principal,
            target_link_uri: state.target_link_uri,
            scopes: state.scopes,
            tokens,
        })))
    }

    /// Reports what a challenge against `issuer` would negotiate without
    /// generating anything.
    ///
    /// # Errors
    ///
    /// Returns [`RpError::Config`] when no registration matches `issuer`,
    /// and propagates configuration provider failures.
    pub async fn negotiate(&self, issuer: &Url) -> Result<NegotiationReport> {
        let registration = self
            .services
            .registrations
            .find_by_issuer(issuer)
            .ok_or_else(|| RpError::Config(format!("no client registration matches the issuer {issuer}")))?;
        let configuration = self.services.configurations.get_configuration(issuer).await?;
        crate::discovery::ensure_issuer(&configuration, issuer)?;

        let grant_type = negotiate_grant_type(
            &registration.grant_types,
            &configuration.grant_types_supported,
        )
        .selected();
        let response_type = grant_type.and_then(|grant_type| {
            negotiate_response_type(
                grant_type,
                &registration.response_types,
                &configuration.response_types_supported,
            )
            .selected()
        });
        let response_mode = response_type.and_then(|response_type| {
            negotiate_response_mode(
                response_type,
                &registration.response_modes,
                &configuration.response_modes_supported,
            )
            .selected()
        });
        let code_challenge_method = match negotiate_code_challenge_method(
            &registration.code_challenge_methods,
            &configuration.code_challenge_methods_supported,
        ) {
            Negotiated::Selected(method) => Some(method.map(|m| m.to_string()).unwrap_or_default()),
            Negotiated::NoAgreement => None,
        };
        let client_authentication_method = negotiate_client_authentication_method(
            &registration.client_authentication_methods,
            &configuration.token_endpoint_auth_methods_supported,
            registration.client_secret.is_some(),
        )
        .selected();

        Ok(NegotiationReport {
            issuer: issuer.to_string(),
            grant_type: grant_type.map(|g| g.to_string()),
            response_type: response_type.map(|r| r.to_string()),
            response_mode: response_mode.map(|m| m.to_string()),
            code_challenge_method,
            client_authentication_method: client_authentication_method.map(|m| m.to_string()),
        })
    }
}
