//! Capability negotiation
//!
//! Pure selection functions over a client capability set and a server
//! capability set. Every function follows the same precedence law:
//!
//! - both sides explicit: the result must be in the intersection;
//! - one side empty: defer entirely to the other side;
//! - both empty: fall back to the protocol default (the first candidate);
//! - no agreement: [`Negotiated::NoAgreement`].
//!
//! Capability sets are raw strings so that an explicit set made only of
//! values this engine does not drive still restricts the outcome.

use std::str::FromStr;

use crate::protocol::{
    ClientAuthenticationMethod, CodeChallengeMethod, GrantType, ResponseMode, ResponseType,
};

/// Outcome of a negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiated<T> {
    Selected(T),
    NoAgreement,
}

impl<T> Negotiated<T> {
    /// Converts into an `Option`, dropping the distinction from a failure.
    pub fn selected(self) -> Option<T> {
        match self {
            Negotiated::Selected(value) => Some(value),
            Negotiated::NoAgreement => None,
        }
    }

    pub fn is_selected(&self) -> bool {
        matches!(self, Negotiated::Selected(_))
    }
}

/// Response type candidates in fixed priority order. `token` on its own is
/// deliberately absent: it cannot be bound to a client registration.
pub const RESPONSE_TYPE_CANDIDATES: [ResponseType; 6] = [
    ResponseType::CODE,
    ResponseType::CODE_ID_TOKEN,
    ResponseType::ID_TOKEN,
    ResponseType::CODE_ID_TOKEN_TOKEN,
    ResponseType::CODE_TOKEN,
    ResponseType::ID_TOKEN_TOKEN,
];

/// A side permits `candidate` when it declares nothing or lists it.
fn permits<F>(declared: &[String], matches: F) -> bool
where
    F: Fn(&str) -> bool,
{
    declared.is_empty() || declared.iter().any(|value| matches(value))
}

fn permitted_by_both<F>(client: &[String], server: &[String], matches: F) -> bool
where
    F: Fn(&str) -> bool,
{
    permits(client, &matches) && permits(server, &matches)
}

fn first_agreed<T, I>(candidates: I, client: &[String], server: &[String]) -> Negotiated<T>
where
    T: Copy + FromStr + PartialEq,
    I: IntoIterator<Item = T>,
{
    candidates
        .into_iter()
        .find(|candidate| {
            permitted_by_both(client, server, |value| {
                value.parse::<T>().map(|v| v == *candidate).unwrap_or(false)
            })
        })
        .map(Negotiated::Selected)
        .unwrap_or(Negotiated::NoAgreement)
}

/// Whether an explicitly requested `value` is acceptable to both sides.
pub fn is_mutually_supported(client: &[String], server: &[String], value: &str) -> bool {
    permitted_by_both(client, server, |declared| declared == value)
}

/// Selects the grant type, preferring `authorization_code` over `implicit`.
///
/// # Examples
///
/// ```
/// use rpflow::negotiation::{negotiate_grant_type, Negotiated};
/// use rpflow::protocol::GrantType;
///
/// let client = vec!["implicit".to_string(), "authorization_code".to_string()];
/// let server = vec!["implicit".to_string()];
/// assert_eq!(
///     negotiate_grant_type(&client, &server),
///     Negotiated::Selected(GrantType::Implicit)
/// );
/// assert_eq!(
///     negotiate_grant_type(&[], &[]),
///     Negotiated::Selected(GrantType::AuthorizationCode)
/// );
/// ```
pub fn negotiate_grant_type(client: &[String], server: &[String]) -> Negotiated<GrantType> {
    first_agreed(
        [GrantType::AuthorizationCode, GrantType::Implicit],
        client,
        server,
    )
}

/// Whether `response_type` can be requested under `grant_type`.
///
/// `code` belongs to the authorization code grant, the pure identity token
/// types to the implicit grant. Hybrid types carry both a code and a
/// frontchannel token and are accepted under either grant.
pub fn is_response_type_compatible(grant_type: GrantType, response_type: ResponseType) -> bool {
    match (response_type.has_code(), response_type.has_id_token() || response_type.has_token()) {
        (true, false) => grant_type == GrantType::AuthorizationCode,
        (false, true) => grant_type == GrantType::Implicit,
        (true, true) => true,
        (false, false) => false,
    }
}

/// Selects a response type from [`RESPONSE_TYPE_CANDIDATES`].
///
/// Declared combinations are compared as unordered component sets, so
/// `"id_token code"` matches `code id_token`.
pub fn negotiate_response_type(
    grant_type: GrantType,
    client: &[String],
    server: &[String],
) -> Negotiated<ResponseType> {
    first_agreed(
        RESPONSE_TYPE_CANDIDATES
            .into_iter()
            .filter(|candidate| is_response_type_compatible(grant_type, *candidate)),
        client,
        server,
    )
}

/// Selects the response mode. `form_post` is preferred when identity or
/// access tokens travel through the frontchannel, `query` otherwise.
/// `fragment` is never selected.
pub fn negotiate_response_mode(
    response_type: ResponseType,
    client: &[String],
    server: &[String],
) -> Negotiated<ResponseMode> {
    let candidates = if response_type.has_id_token() || response_type.has_token() {
        [ResponseMode::FormPost, ResponseMode::Query]
    } else {
        [ResponseMode::Query, ResponseMode::FormPost]
    };
    first_agreed(candidates, client, server)
}

/// Selects the PKCE method, preferring `S256` over `plain`.
///
/// Yields `Selected(None)` when the server declares no supported method:
/// PKCE is then omitted from the request.
pub fn negotiate_code_challenge_method(
    client: &[String],
    server: &[String],
) -> Negotiated<Option<CodeChallengeMethod>> {
    if server.is_empty() {
        return Negotiated::Selected(None);
    }
    match first_agreed(
        [CodeChallengeMethod::S256, CodeChallengeMethod::Plain],
        client,
        server,
    ) {
        Negotiated::Selected(method) => Negotiated::Selected(Some(method)),
        Negotiated::NoAgreement => Negotiated::NoAgreement,
    }
}

/// Selects how the client authenticates at the token endpoint.
///
/// A client without a secret is a public client and always uses `none`.
pub fn negotiate_client_authentication_method(
    client: &[String],
    server: &[String],
    has_secret: bool,
) -> Negotiated<ClientAuthenticationMethod> {
    if !has_secret {
        return Negotiated::Selected(ClientAuthenticationMethod::None);
    }
    [
        ClientAuthenticationMethod::ClientSecretBasic,
        ClientAuthenticationMethod::ClientSecretPost,
    ]
    .into_iter()
    .find(|candidate| permitted_by_both(client, server, |value| value == candidate.as_str()))
    .map(Negotiated::Selected)
    .unwrap_or(Negotiated::NoAgreement)
}
