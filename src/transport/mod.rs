//! Backchannel transport abstraction
//!
//! The authentication pipeline talks to the authorization server directly
//! twice: the token request (authorization code exchange) and the userinfo
//! request. Both go through the [`Transport`] trait so the pipeline never
//! touches HTTP itself.
//!
//! - [`http::HttpTransport`] -- `reqwest` implementation.
//!
//! Transports return the server's answer as-is, including OAuth error
//! responses: deciding that `{"error": "invalid_grant"}` is a rejection is
//! the pipeline's job. A transport only fails (`Err`) when it could not get a
//! usable answer at all.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::error::{Rejection, Result};
use crate::principal::Principal;
use crate::protocol::{parameters, ClientAuthenticationMethod, Parameters};
use crate::registration::ClientRegistration;

pub mod http;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A token endpoint request.
///
/// `parameters` never contains client credentials: the transport adds them
/// according to `authentication_method`, reading the secret from the
/// registration.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRequest {
    pub endpoint: Url,
    pub authentication_method: ClientAuthenticationMethod,
    pub parameters: Parameters,
}

/// A userinfo endpoint request authenticated with a bearer access token.
#[derive(Clone, PartialEq)]
pub struct UserinfoRequest {
    pub endpoint: Url,
    pub access_token: String,
}

impl std::fmt::Debug for UserinfoRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserinfoRequest")
            .field("endpoint", &self.endpoint)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// JSON object returned by a backchannel endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseParameters(Map<String, Value>);

impl ResponseParameters {
    pub fn new(parameters: Map<String, Value>) -> Self {
        Self(parameters)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Returns a string parameter, treating empty strings as absent.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// The OAuth error carried by the response, if any.
    pub fn error(&self) -> Option<Rejection> {
        let error = self.get_str(parameters::ERROR)?;
        let mut rejection = Rejection::new(error);
        if let Some(description) = self.get_str(parameters::ERROR_DESCRIPTION) {
            rejection = rejection.with_description(description);
        }
        if let Some(uri) = self.get_str(parameters::ERROR_URI) {
            rejection = rejection.with_uri(uri);
        }
        Some(rejection)
    }
}

impl From<Map<String, Value>> for ResponseParameters {
    fn from(parameters: Map<String, Value>) -> Self {
        Self(parameters)
    }
}

/// Answer of the token endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenResponse {
    pub parameters: ResponseParameters,
}

/// Answer of the userinfo endpoint.
///
/// A JSON answer fills `parameters` and `principal` (claims as sent, not
/// validated). An `application/jwt` answer fills `token` only; the caller
/// validates it through the token dispatcher.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserinfoResponse {
    pub parameters: ResponseParameters,
    pub principal: Option<Principal>,
    pub token: Option<String>,
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Backchannel client used by the authentication pipeline.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Sends a token request on behalf of `registration`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::RpError::Transport`] when the endpoint cannot
    /// be reached or answers with something that is not an OAuth response.
    async fn send_token_request(
        &self,
        registration: &ClientRegistration,
        request: TokenRequest,
    ) -> Result<TokenResponse>;

    /// Sends a userinfo request on behalf of `registration`.
    async fn send_userinfo_request(
        &self,
        registration: &ClientRegistration,
        request: UserinfoRequest,
    ) -> Result<UserinfoResponse>;
}
