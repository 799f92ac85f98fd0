//! Test utilities for rpflow
//!
//! In-process fakes for the token dispatcher and the transport, plus
//! fixture builders for a registration and server configuration that agree
//! on the authorization code flow with PKCE.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use url::Url;

use crate::discovery::{ServerConfiguration, StaticConfigurationProvider};
use crate::error::{Rejection, Result, RpError, Verdict};
use crate::principal::Principal;
use crate::protocol::TokenKind;
use crate::registration::{ClientRegistration, RegistrationStore};
use crate::service::Services;
use crate::tokens::{TokenDispatcher, TokenValidationRequest};
use crate::transport::{TokenRequest, TokenResponse, Transport, UserinfoRequest, UserinfoResponse};

/// Issuer used by every fixture.
pub fn issuer() -> Url {
    Url::parse("https://login.example.com/").unwrap()
}

/// Confidential client registered with [`issuer`].
pub fn registration() -> ClientRegistration {
    let mut registration = ClientRegistration::new(issuer(), "client-a");
    registration.client_secret = Some("client-secret".to_string());
    registration.redirect_uri = Some(Url::parse("https://app.example.com/callback").unwrap());
    registration.scopes = vec!["openid".to_string(), "profile".to_string()];
    registration
}

/// Server configuration of [`issuer`].
pub fn configuration() -> ServerConfiguration {
    let base = issuer();
    let mut configuration = ServerConfiguration::new(base.clone());
    configuration.authorization_endpoint = Some(base.join("authorize").unwrap());
    configuration.token_endpoint = Some(base.join("token").unwrap());
    configuration.grant_types_supported = vec!["authorization_code".into(), "implicit".into()];
    configuration.response_types_supported = vec!["code".into(), "code id_token".into()];
    configuration.response_modes_supported = vec!["query".into(), "form_post".into()];
    configuration.code_challenge_methods_supported = vec!["S256".into()];
    configuration.token_endpoint_auth_methods_supported =
        vec!["client_secret_basic".into(), "client_secret_post".into()];
    configuration.scopes_supported = vec!["openid".into(), "profile".into()];
    configuration
}

/// Collaborators wired to fakes, with handles to drive them.
#[derive(Debug)]
pub struct Fixture {
    pub services: Services,
    pub tokens: Arc<FakeTokenDispatcher>,
    pub transport: Arc<FakeTransport>,
    pub configurations: Arc<StaticConfigurationProvider>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with(vec![registration()], vec![configuration()])
    }

    pub fn with(registrations: Vec<ClientRegistration>, documents: Vec<ServerConfiguration>) -> Self {
        let tokens = Arc::new(FakeTokenDispatcher::default());
        let transport = Arc::new(FakeTransport::default());
        let configurations = Arc::new(StaticConfigurationProvider::new(documents));
        let services = Services {
            registrations: Arc::new(RegistrationStore::new(registrations)),
            configurations: configurations.clone(),
            tokens: tokens.clone(),
            transport: transport.clone(),
        };
        Self {
            services,
            tokens,
            transport,
            configurations,
        }
    }
}

/// Services for [`registration`] and [`configuration`].
pub fn services() -> Services {
    Fixture::new().services
}

/// Token dispatcher backed by a map of opaque token strings.
///
/// Generated tokens are `fake-<kind>-<n>`; [`FakeTokenDispatcher::register`]
/// makes any string validate to a given principal.
#[derive(Debug, Default)]
pub struct FakeTokenDispatcher {
    tokens: Mutex<HashMap<String, Principal>>,
}

impl FakeTokenDispatcher {
    pub fn register(&self, token: &str, principal: Principal) {
        self.tokens.lock().unwrap().insert(token.to_string(), principal);
    }

    pub fn issued(&self) -> usize {
        self.tokens.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl TokenDispatcher for FakeTokenDispatcher {
    async fn validate_token(&self, request: TokenValidationRequest<'_>) -> Result<Verdict<Principal>> {
        let tokens = self.tokens.lock().unwrap();
        let verdict = match tokens.get(request.token) {
            Some(principal)
                if principal
                    .kind()
                    .map(|kind| request.kinds.contains(&kind))
                    .unwrap_or(false) =>
            {
                Ok(principal.clone())
            }
            Some(_) => Err(Rejection::invalid_token("The token is not of the expected kind.")),
            None => Err(Rejection::invalid_token("The token is unknown.")),
        };
        Ok(verdict)
    }

    async fn generate_token(&self, principal: &Principal, kind: TokenKind) -> Result<Verdict<String>> {
        let mut tokens = self.tokens.lock().unwrap();
        let token = format!("fake-{}-{}", kind.as_str(), tokens.len());
        tokens.insert(token.clone(), principal.clone().with_kind(kind));
        Ok(Ok(token))
    }
}

/// Transport answering with canned responses and recording requests.
#[derive(Debug, Default)]
pub struct FakeTransport {
    token_response: Mutex<Option<TokenResponse>>,
    userinfo_response: Mutex<Option<UserinfoResponse>>,
    pub token_requests: Mutex<Vec<TokenRequest>>,
    pub userinfo_requests: Mutex<Vec<UserinfoRequest>>,
}

impl FakeTransport {
    pub fn respond_to_token_request(&self, response: TokenResponse) {
        *self.token_response.lock().unwrap() = Some(response);
    }

    pub fn respond_to_userinfo_request(&self, response: UserinfoResponse) {
        *self.userinfo_response.lock().unwrap() = Some(response);
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn send_token_request(
        &self,
        _registration: &ClientRegistration,
        request: TokenRequest,
    ) -> Result<TokenResponse> {
        self.token_requests.lock().unwrap().push(request);
        self.token_response
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| RpError::Transport("no token response configured".to_string()).into())
    }

    async fn send_userinfo_request(
        &self,
        _registration: &ClientRegistration,
        request: UserinfoRequest,
    ) -> Result<UserinfoResponse> {
        self.userinfo_requests.lock().unwrap().push(request);
        self.userinfo_response
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| RpError::Transport("no userinfo response configured".to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::ConfigurationProvider;

    #[tokio::test]
    async fn test_fake_dispatcher_round_trip() {
        let dispatcher = FakeTokenDispatcher::default();
        let mut principal = Principal::new();
        principal.set_claim("sub", "alice");

        let token = dispatcher
            .generate_token(&principal, TokenKind::State)
            .await
            .unwrap()
            .unwrap();
        let validated = dispatcher
            .validate_token(TokenValidationRequest::new(&token, &[TokenKind::State]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(validated.claim_str("sub"), Some("alice"));

        let wrong_kind = dispatcher
            .validate_token(TokenValidationRequest::new(&token, &[TokenKind::IdentityToken]))
            .await
            .unwrap();
        assert!(wrong_kind.is_err());
    }

    #[tokio::test]
    async fn test_fake_transport_without_response_fails() {
        let transport = FakeTransport::default();
        let request = TokenRequest {
            endpoint: Url::parse("https://login.example.com/token").unwrap(),
            authentication_method: crate::protocol::ClientAuthenticationMethod::None,
            parameters: Default::default(),
        };
        assert!(transport
            .send_token_request(&registration(), request)
            .await
            .is_err());
        assert_eq!(transport.token_requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fixture_configuration_is_served() {
        let fixture = Fixture::new();
        let configuration = fixture
            .configurations
            .get_configuration(&issuer())
            .await
            .unwrap();
        assert_eq!(configuration, super::configuration());
    }
}
