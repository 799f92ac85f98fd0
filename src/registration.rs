//! Client registrations
//!
//! A [`ClientRegistration`] is the static description of one relationship
//! with an authorization server. Capability sets (grant types, response
//! types, ...) are kept as raw strings: an explicit set that only contains
//! values the engine does not drive must still count as an explicit
//! restriction during negotiation, so unknown values are never dropped.

use serde::{Deserialize, Serialize};
use url::Url;

/// Static configuration for one authorization server relationship.
///
/// Empty capability sets mean "no explicit restriction".
///
/// # Examples
///
/// ```
/// use rpflow::registration::ClientRegistration;
///
/// let yaml = r#"
/// issuer: https://login.example.com/
/// client_id: web-app
/// redirect_uri: https://app.example.com/callback
/// scopes: [openid, profile]
/// "#;
///
/// let registration: ClientRegistration = serde_yaml::from_str(yaml).unwrap();
/// assert_eq!(registration.client_id, "web-app");
/// assert!(registration.grant_types.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRegistration {
    /// Authorization server issuer; unique key of the registration.
    pub issuer: Url,

    pub client_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Optional for pure OAuth 2.0, mandatory once `openid` is requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<Url>,

    #[serde(default)]
    pub grant_types: Vec<String>,

    /// Space-joined response type combinations.
    #[serde(default)]
    pub response_types: Vec<String>,

    #[serde(default)]
    pub response_modes: Vec<String>,

    #[serde(default)]
    pub code_challenge_methods: Vec<String>,

    #[serde(default)]
    pub client_authentication_methods: Vec<String>,

    #[serde(default)]
    pub scopes: Vec<String>,
}

impl ClientRegistration {
    /// Creates a registration with no capability restrictions.
    pub fn new(issuer: Url, client_id: impl Into<String>) -> Self {
        Self {
            issuer,
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: None,
            grant_types: Vec::new(),
            response_types: Vec::new(),
            response_modes: Vec::new(),
            code_challenge_methods: Vec::new(),
            client_authentication_methods: Vec::new(),
            scopes: Vec::new(),
        }
    }
}

/// Registrations supplied at startup, searchable by issuer.
#[derive(Debug, Clone, Default)]
pub struct RegistrationStore {
    registrations: Vec<ClientRegistration>,
}

impl RegistrationStore {
    pub fn new(registrations: Vec<ClientRegistration>) -> Self {
        Self { registrations }
    }

    pub fn find_by_issuer(&self, issuer: &Url) -> Option<&ClientRegistration> {
        self.registrations
            .iter()
            .find(|registration| registration.issuer == *issuer)
    }

    /// Returns the only registration when exactly one is configured.
    pub fn sole(&self) -> Option<&ClientRegistration> {
        match self.registrations.as_slice() {
            [registration] => Some(registration),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientRegistration> {
        self.registrations.iter()
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(issuer: &str) -> ClientRegistration {
        ClientRegistration::new(Url::parse(issuer).unwrap(), "client")
    }

    #[test]
    fn test_find_by_issuer_matches_exact_issuer() {
        let store = RegistrationStore::new(vec![
            registration("https://a.example.com/"),
            registration("https://b.example.com/"),
        ]);
        let issuer = Url::parse("https://b.example.com/").unwrap();
        assert_eq!(store.find_by_issuer(&issuer).unwrap().issuer, issuer);
        let unknown = Url::parse("https://c.example.com/").unwrap();
        assert!(store.find_by_issuer(&unknown).is_none());
    }

    #[test]
    fn test_sole_requires_exactly_one_registration() {
        assert!(RegistrationStore::default().sole().is_none());
        let one = RegistrationStore::new(vec![registration("https://a.example.com/")]);
        assert!(one.sole().is_some());
        let two = RegistrationStore::new(vec![
            registration("https://a.example.com/"),
            registration("https://b.example.com/"),
        ]);
        assert!(two.sole().is_none());
    }

    #[test]
    fn test_registration_deserializes_capabilities() {
        let yaml = r#"
issuer: https://login.example.com/
client_id: web-app
client_secret: s3cr3t
grant_types: [authorization_code]
response_types: ["code", "code id_token"]
code_challenge_methods: [S256]
"#;
        let registration: ClientRegistration = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(registration.client_secret.as_deref(), Some("s3cr3t"));
        assert_eq!(registration.response_types.len(), 2);
        assert!(registration.redirect_uri.is_none());
    }
}
