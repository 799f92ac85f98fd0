//! Request-scoped pipeline contexts
//!
//! Each context is created by the call that runs a pipeline, mutated by the
//! handlers in order, and dropped once the call returns. Fields start empty
//! and fill up as the pipeline progresses.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::discovery::ServerConfiguration;
use crate::pipeline::{PipelineContext, Signal};
use crate::principal::Principal;
use crate::protocol::{CodeChallengeMethod, GrantType, Parameters, ResponseMode, ResponseType};
use crate::registration::ClientRegistration;
use crate::state_token::StateTokenClaims;
use crate::transport::{TokenRequest, TokenResponse, UserinfoRequest, UserinfoResponse};

// ---------------------------------------------------------------------------
// Challenge
// ---------------------------------------------------------------------------

/// What the host asks for when starting an authorization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChallengeDemand {
    /// Authorization server to use; may be omitted when exactly one
    /// registration exists.
    #[serde(default)]
    pub issuer: Option<Url>,

    /// Explicit grant type as received from the host, validated by the
    /// pipeline.
    #[serde(default)]
    pub grant_type: Option<String>,

    /// Scopes to request; the registration scopes are used when empty.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Where the host wants to send the user once authenticated.
    #[serde(default)]
    pub target_link_uri: Option<String>,

    /// Claims the host wants to carry through the state token.
    #[serde(default)]
    pub principal: Option<Principal>,

    /// Additional authorization request parameters (`prompt`,
    /// `login_hint`, ...). Never overrides a parameter set by the pipeline.
    #[serde(default)]
    pub parameters: Parameters,
}

/// Context of the challenge pipeline.
#[derive(Debug, Default)]
pub struct ProcessChallengeContext {
    signal: Signal,

    pub demand: ChallengeDemand,

    pub issuer: Option<Url>,
    pub registration: Option<ClientRegistration>,
    pub configuration: Option<ServerConfiguration>,

    pub grant_type: Option<GrantType>,
    pub response_type: Option<ResponseType>,
    pub response_mode: Option<ResponseMode>,

    pub client_id: Option<String>,
    pub redirect_uri: Option<Url>,
    /// Ordered, duplicate-free.
    pub scopes: Vec<String>,

    pub request_forgery_protection: Option<String>,
    pub nonce: Option<String>,
    pub code_verifier: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<CodeChallengeMethod>,

    pub generate_state_token: bool,
    pub state_token_principal: Option<Principal>,
    pub state_token: Option<String>,

    /// Outbound authorization request parameters.
    pub parameters: Parameters,
}

impl ProcessChallengeContext {
    pub fn new(demand: ChallengeDemand) -> Self {
        Self {
            demand,
            ..Self::default()
        }
    }

    /// Adds `scope` unless already present.
    pub fn add_scope(&mut self, scope: &str) {
        if !self.has_scope(scope) {
            self.scopes.push(scope.to_string());
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

impl PipelineContext for ProcessChallengeContext {
    fn signal(&self) -> &Signal {
        &self.signal
    }

    fn set_signal(&mut self, signal: Signal) {
        self.signal = signal;
    }
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

/// Endpoint a callback was received on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointType {
    /// The redirection endpoint of the authorization code / implicit flows.
    #[default]
    Redirection,
}

/// Callback received by the host.
#[derive(Clone, Default, PartialEq)]
pub struct AuthenticationRequest {
    pub endpoint_type: EndpointType,
    /// Query or form parameters of the callback.
    pub parameters: Parameters,
    /// Forgery-protection value the host bound to the user agent at
    /// challenge time, when it did.
    pub request_forgery_protection: Option<String>,
}

impl AuthenticationRequest {
    pub fn new(parameters: Parameters) -> Self {
        Self {
            parameters,
            ..Self::default()
        }
    }

    pub fn with_request_forgery_protection(mut self, value: impl Into<String>) -> Self {
        self.request_forgery_protection = Some(value.into());
        self
    }
}

impl std::fmt::Debug for AuthenticationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.parameters.iter().map(|(name, _)| name).collect();
        f.debug_struct("AuthenticationRequest")
            .field("endpoint_type", &self.endpoint_type)
            .field("parameters", &names)
            .finish_non_exhaustive()
    }
}

/// Extraction, requirement and validation state of one token kind.
///
/// `token` is only ever set when `extract` is true, and `principal` only
/// when `token` is set and validation succeeded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenSlot {
    pub extract: bool,
    pub require: bool,
    pub validate: bool,
    pub token: Option<String>,
    pub principal: Option<Principal>,
}

impl TokenSlot {
    pub fn configure(&mut self, extract: bool, require: bool, validate: bool) {
        self.extract = extract;
        self.require = require;
        self.validate = validate;
    }

    /// Stores `value` when extraction is enabled.
    pub fn extract_from(&mut self, value: Option<&str>) {
        if self.extract {
            self.token = value.map(str::to_string);
        }
    }

    /// Stores the validated principal of the extracted token.
    pub fn accept(&mut self, principal: Principal) {
        if self.token.is_some() {
            self.principal = Some(principal);
        }
    }

    /// Whether a required token is missing.
    pub fn is_missing(&self) -> bool {
        self.require && self.token.is_none()
    }

    /// Whether the extracted token still awaits validation.
    pub fn needs_validation(&self) -> bool {
        self.validate && self.token.is_some() && self.principal.is_none()
    }
}

/// Context of the authentication pipeline.
#[derive(Debug, Default)]
pub struct ProcessAuthenticationContext {
    signal: Signal,

    pub endpoint_type: EndpointType,
    pub request: Parameters,
    pub request_forgery_protection: Option<String>,

    pub state_token: TokenSlot,
    pub authorization_code: TokenSlot,
    pub frontchannel_access_token: TokenSlot,
    pub frontchannel_identity_token: TokenSlot,
    pub backchannel_access_token: TokenSlot,
    pub backchannel_identity_token: TokenSlot,
    pub refresh_token: TokenSlot,
    pub userinfo_token: TokenSlot,

    /// Values restored from the validated state token.
    pub state: Option<StateTokenClaims>,

    pub issuer: Option<Url>,
    pub registration: Option<ClientRegistration>,
    pub configuration: Option<ServerConfiguration>,

    pub token_request: Option<TokenRequest>,
    pub token_response: Option<TokenResponse>,
    pub userinfo_request: Option<UserinfoRequest>,
    pub userinfo_response: Option<UserinfoResponse>,

    /// Claims returned by a plain JSON userinfo response.
    pub userinfo_principal: Option<Principal>,

    /// Final merged principal.
    pub principal: Option<Principal>,
}

impl ProcessAuthenticationContext {
    pub fn new(request: AuthenticationRequest) -> Self {
        Self {
            endpoint_type: request.endpoint_type,
            request: request.parameters,
            request_forgery_protection: request.request_forgery_protection,
            ..Self::default()
        }
    }

    /// The restored state claims, once Phase A has run.
    pub fn state_claims(&self) -> Option<&StateTokenClaims> {
        self.state.as_ref()
    }
}

impl PipelineContext for ProcessAuthenticationContext {
    fn signal(&self) -> &Signal {
        &self.signal
    }

    fn set_signal(&mut self, signal: Signal) {
        self.signal = signal;
    }
}
