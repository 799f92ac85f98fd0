//! OAuth 2.0 / OpenID Connect wire vocabulary
//!
//! Parameter names, claim names and error codes used at the wire boundary,
//! the typed protocol values the engine negotiates, and [`Parameters`], the
//! ordered string-keyed bag used for inbound callbacks and outbound requests.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Standard request/response parameter names.
pub mod parameters {
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const CLIENT_ID: &str = "client_id";
    pub const CLIENT_SECRET: &str = "client_secret";
    pub const CODE: &str = "code";
    pub const CODE_CHALLENGE: &str = "code_challenge";
    pub const CODE_CHALLENGE_METHOD: &str = "code_challenge_method";
    pub const CODE_VERIFIER: &str = "code_verifier";
    pub const ERROR: &str = "error";
    pub const ERROR_DESCRIPTION: &str = "error_description";
    pub const ERROR_URI: &str = "error_uri";
    pub const GRANT_TYPE: &str = "grant_type";
    pub const ID_TOKEN: &str = "id_token";
    pub const ISS: &str = "iss";
    pub const NONCE: &str = "nonce";
    pub const REDIRECT_URI: &str = "redirect_uri";
    pub const REFRESH_TOKEN: &str = "refresh_token";
    pub const RESPONSE_MODE: &str = "response_mode";
    pub const RESPONSE_TYPE: &str = "response_type";
    pub const SCOPE: &str = "scope";
    pub const STATE: &str = "state";
    pub const TOKEN_TYPE: &str = "token_type";
}

/// Registered JWT / OpenID Connect claim names.
pub mod claims {
    pub const ACCESS_TOKEN_HASH: &str = "at_hash";
    pub const AUDIENCE: &str = "aud";
    pub const AUTHENTICATION_METHOD_REFERENCE: &str = "amr";
    pub const AUTHENTICATION_TIME: &str = "auth_time";
    pub const AUTHORIZED_PARTY: &str = "azp";
    pub const CODE_HASH: &str = "c_hash";
    pub const EXPIRES_AT: &str = "exp";
    pub const ISSUED_AT: &str = "iat";
    pub const ISSUER: &str = "iss";
    pub const JWT_ID: &str = "jti";
    pub const NONCE: &str = "nonce";
    pub const NOT_BEFORE: &str = "nbf";
    pub const SUBJECT: &str = "sub";
}

/// OAuth 2.0 error codes used by the engine.
pub mod errors {
    pub const ACCESS_DENIED: &str = "access_denied";
    pub const INVALID_REQUEST: &str = "invalid_request";
    pub const INVALID_TOKEN: &str = "invalid_token";
    pub const SERVER_ERROR: &str = "server_error";
}

/// Scope values with protocol meaning.
pub mod scopes {
    pub const OPENID: &str = "openid";
}

/// Error raised when a protocol value cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownValue(pub String);

impl fmt::Display for UnknownValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported protocol value: {}", self.0)
    }
}

impl std::error::Error for UnknownValue {}

// ---------------------------------------------------------------------------
// Grant types
// ---------------------------------------------------------------------------

/// Interactive grant types the engine can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    Implicit,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::Implicit => "implicit",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantType {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization_code" => Ok(GrantType::AuthorizationCode),
            "implicit" => Ok(GrantType::Implicit),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// A `response_type` combination, compared as an unordered set of
/// components.
///
/// # Examples
///
/// ```
/// use rpflow::protocol::ResponseType;
///
/// let parsed: ResponseType = "id_token code".parse().unwrap();
/// assert_eq!(parsed, ResponseType::CODE_ID_TOKEN);
/// assert_eq!(parsed.to_string(), "code id_token");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseType {
    code: bool,
    id_token: bool,
    token: bool,
}

impl ResponseType {
    pub const CODE: ResponseType = ResponseType::new(true, false, false);
    pub const CODE_ID_TOKEN: ResponseType = ResponseType::new(true, true, false);
    pub const CODE_ID_TOKEN_TOKEN: ResponseType = ResponseType::new(true, true, true);
    pub const CODE_TOKEN: ResponseType = ResponseType::new(true, false, true);
    pub const ID_TOKEN: ResponseType = ResponseType::new(false, true, false);
    pub const ID_TOKEN_TOKEN: ResponseType = ResponseType::new(false, true, true);
    pub const TOKEN: ResponseType = ResponseType::new(false, false, true);

    const fn new(code: bool, id_token: bool, token: bool) -> Self {
        Self {
            code,
            id_token,
            token,
        }
    }

    /// Whether an authorization code is returned.
    pub fn has_code(&self) -> bool {
        self.code
    }

    /// Whether an identity token is returned from the authorization endpoint.
    pub fn has_id_token(&self) -> bool {
        self.id_token
    }

    /// Whether an access token is returned from the authorization endpoint.
    pub fn has_token(&self) -> bool {
        self.token
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::with_capacity(3);
        if self.code {
            parts.push("code");
        }
        if self.id_token {
            parts.push("id_token");
        }
        if self.token {
            parts.push("token");
        }
        f.write_str(&parts.join(" "))
    }
}

impl FromStr for ResponseType {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut response_type = ResponseType::new(false, false, false);
        let mut seen = BTreeSet::new();
        for component in s.split_whitespace() {
            if !seen.insert(component) {
                return Err(UnknownValue(s.to_string()));
            }
            match component {
                "code" => response_type.code = true,
                "id_token" => response_type.id_token = true,
                "token" => response_type.token = true,
                _ => return Err(UnknownValue(s.to_string())),
            }
        }
        if seen.is_empty() {
            return Err(UnknownValue(s.to_string()));
        }
        Ok(response_type)
    }
}

impl Serialize for ResponseType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ResponseType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Response modes
// ---------------------------------------------------------------------------

/// How the authorization server delivers the authorization response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    Query,
    Fragment,
    FormPost,
}

impl ResponseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseMode::Query => "query",
            ResponseMode::Fragment => "fragment",
            ResponseMode::FormPost => "form_post",
        }
    }
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseMode {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "query" => Ok(ResponseMode::Query),
            "fragment" => Ok(ResponseMode::Fragment),
            "form_post" => Ok(ResponseMode::FormPost),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// PKCE methods
// ---------------------------------------------------------------------------

/// PKCE `code_challenge_method` values (RFC 7636).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodeChallengeMethod {
    #[serde(rename = "plain")]
    Plain,
    #[serde(rename = "S256")]
    S256,
}

impl CodeChallengeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeChallengeMethod::Plain => "plain",
            CodeChallengeMethod::S256 => "S256",
        }
    }
}

impl fmt::Display for CodeChallengeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodeChallengeMethod {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Method names are case-sensitive.
        match s {
            "plain" => Ok(CodeChallengeMethod::Plain),
            "S256" => Ok(CodeChallengeMethod::S256),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Client authentication methods
// ---------------------------------------------------------------------------

/// Token endpoint client authentication methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthenticationMethod {
    ClientSecretBasic,
    ClientSecretPost,
    None,
}

impl ClientAuthenticationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientAuthenticationMethod::ClientSecretBasic => "client_secret_basic",
            ClientAuthenticationMethod::ClientSecretPost => "client_secret_post",
            ClientAuthenticationMethod::None => "none",
        }
    }
}

impl fmt::Display for ClientAuthenticationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Token kinds
// ---------------------------------------------------------------------------

/// The kinds of tokens routed through the token dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    State,
    AuthorizationCode,
    AccessToken,
    IdentityToken,
    RefreshToken,
    UserinfoToken,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::State => "state_token",
            TokenKind::AuthorizationCode => "authorization_code",
            TokenKind::AccessToken => "access_token",
            TokenKind::IdentityToken => "id_token",
            TokenKind::RefreshToken => "refresh_token",
            TokenKind::UserinfoToken => "userinfo_token",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Ordered, flat, string-keyed parameter bag.
///
/// Insertion order is preserved so outbound requests are emitted in a stable
/// order. Inserting an existing key replaces its value in place.
///
/// # Examples
///
/// ```
/// use rpflow::protocol::Parameters;
///
/// let params = Parameters::from_query("code=abc&state=xyz&scope=openid%20profile");
/// assert_eq!(params.get("code"), Some("abc"));
/// assert_eq!(params.get("scope"), Some("openid profile"));
/// assert_eq!(params.get("missing"), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameters {
    entries: Vec<(String, String)>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses an `application/x-www-form-urlencoded` string. Empty keys are
    /// dropped and the first occurrence of a duplicated key wins.
    pub fn from_query(query: &str) -> Self {
        let mut parameters = Self::new();
        for (key, value) in url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
            if key.is_empty() || parameters.contains(&key) {
                continue;
            }
            parameters.entries.push((key.into_owned(), value.into_owned()));
        }
        parameters
    }

    /// Returns the value of `name`, treating empty values as absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .filter(|value| !value.is_empty())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(key, _)| key == name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let index = self.entries.iter().position(|(key, _)| key == name)?;
        Some(self.entries.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes the bag as `application/x-www-form-urlencoded`.
    pub fn to_query(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.iter())
            .finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut parameters = Parameters::new();
        for (key, value) in iter {
            parameters.insert(key, value);
        }
        parameters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_type_round_trips_through_str() {
        for grant in [GrantType::AuthorizationCode, GrantType::Implicit] {
            assert_eq!(grant.as_str().parse::<GrantType>().unwrap(), grant);
        }
        assert!("refresh_token".parse::<GrantType>().is_err());
    }

    #[test]
    fn test_response_type_parse_is_order_insensitive() {
        let a: ResponseType = "code id_token token".parse().unwrap();
        let b: ResponseType = "token code id_token".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a, ResponseType::CODE_ID_TOKEN_TOKEN);
        assert_eq!(b.to_string(), "code id_token token");
    }

    #[test]
    fn test_response_type_rejects_unknown_or_duplicate_components() {
        assert!("none".parse::<ResponseType>().is_err());
        assert!("code code".parse::<ResponseType>().is_err());
        assert!("".parse::<ResponseType>().is_err());
        assert!("code device".parse::<ResponseType>().is_err());
    }

    #[test]
    fn test_response_type_components() {
        assert!(ResponseType::CODE_TOKEN.has_code());
        assert!(ResponseType::CODE_TOKEN.has_token());
        assert!(!ResponseType::CODE_TOKEN.has_id_token());
        assert!(!ResponseType::ID_TOKEN.has_code());
    }

    #[test]
    fn test_response_type_serde_uses_space_joined_string() {
        let json = serde_json::to_string(&ResponseType::ID_TOKEN_TOKEN).unwrap();
        assert_eq!(json, "\"id_token token\"");
        let back: ResponseType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ResponseType::ID_TOKEN_TOKEN);
    }

    #[test]
    fn test_code_challenge_method_is_case_sensitive() {
        assert_eq!(
            "S256".parse::<CodeChallengeMethod>().unwrap(),
            CodeChallengeMethod::S256
        );
        assert!("s256".parse::<CodeChallengeMethod>().is_err());
    }

    #[test]
    fn test_parameters_insert_replaces_in_place() {
        let mut params = Parameters::new();
        params.insert("client_id", "a");
        params.insert("redirect_uri", "https://app/cb");
        params.insert("client_id", "b");
        let keys: Vec<_> = params.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["client_id", "redirect_uri"]);
        assert_eq!(params.get("client_id"), Some("b"));
    }

    #[test]
    fn test_parameters_empty_value_is_absent() {
        let params = Parameters::from_query("iss=&state=abc");
        assert!(params.contains("iss"));
        assert_eq!(params.get("iss"), None);
        assert_eq!(params.get("state"), Some("abc"));
    }

    #[test]
    fn test_parameters_first_duplicate_wins() {
        let params = Parameters::from_query("?state=first&state=second");
        assert_eq!(params.get("state"), Some("first"));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_parameters_to_query_encodes_values() {
        let params: Parameters = [("scope", "openid profile"), ("state", "a+b")]
            .into_iter()
            .collect();
        assert_eq!(params.to_query(), "scope=openid+profile&state=a%2Bb");
    }

    #[test]
    fn test_parameters_remove() {
        let mut params = Parameters::from_query("a=1&b=2");
        assert_eq!(params.remove("a"), Some("1".to_string()));
        assert_eq!(params.remove("a"), None);
        assert_eq!(params.len(), 1);
    }
}
