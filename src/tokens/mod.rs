//! Token dispatcher abstraction
//!
//! Every token the engine produces or consumes is routed through a
//! [`TokenDispatcher`]: state tokens are generated at challenge time and
//! validated on the callback, identity and userinfo tokens are validated
//! after they arrive from the authorization server.
//!
//! Implementations:
//!
//! - [`jwt::JwtTokenDispatcher`] -- HS256 state tokens and JWS identity /
//!   userinfo tokens verified with the client secret or the server's JWKS.
//!
//! A dispatcher distinguishes two failure modes. A token that is invalid
//! (bad signature, expired, replayed, wrong audience) yields
//! `Ok(Err(Rejection))`; a dispatcher that cannot do its job at all (missing
//! key material, JWKS endpoint down) yields `Err(_)`.

use crate::discovery::ServerConfiguration;
use crate::error::{Result, Verdict};
use crate::principal::Principal;
use crate::protocol::TokenKind;
use crate::registration::ClientRegistration;

pub mod jwt;

/// Input of [`TokenDispatcher::validate_token`].
#[derive(Debug, Clone, Copy)]
pub struct TokenValidationRequest<'a> {
    /// Raw token string as received.
    pub token: &'a str,
    /// Kinds the token may legitimately be.
    pub kinds: &'a [TokenKind],
    /// Registration the token was issued for, when already resolved.
    pub registration: Option<&'a ClientRegistration>,
    /// Configuration of the issuing server, when already resolved.
    pub configuration: Option<&'a ServerConfiguration>,
}

impl<'a> TokenValidationRequest<'a> {
    pub fn new(token: &'a str, kinds: &'a [TokenKind]) -> Self {
        Self {
            token,
            kinds,
            registration: None,
            configuration: None,
        }
    }

    pub fn with_registration(mut self, registration: &'a ClientRegistration) -> Self {
        self.registration = Some(registration);
        self
    }

    pub fn with_configuration(mut self, configuration: &'a ServerConfiguration) -> Self {
        self.configuration = Some(configuration);
        self
    }
}

/// Generates and validates tokens on behalf of both pipelines.
///
/// Used polymorphically through `Arc<dyn TokenDispatcher>`.
#[async_trait::async_trait]
pub trait TokenDispatcher: Send + Sync + std::fmt::Debug {
    /// Validates a token and returns the principal it carries.
    async fn validate_token(
        &self,
        request: TokenValidationRequest<'_>,
    ) -> Result<Verdict<Principal>>;

    /// Serializes `principal` into a token of the given kind.
    async fn generate_token(&self, principal: &Principal, kind: TokenKind)
        -> Result<Verdict<String>>;
}
