//! Authorization server configuration (discovery metadata)
//!
//! [`ServerConfiguration`] models the RFC 8414 / OpenID Connect Discovery
//! document of an authorization server. Documents are obtained through the
//! [`ConfigurationProvider`] collaborator; retrieving and caching them over
//! HTTP is the provider's business. Callers must always re-check the
//! returned `issuer` against the issuer they asked for, see
//! [`ensure_issuer`].
//!
//! # References
//!
//! - RFC 8414 <https://www.rfc-editor.org/rfc/rfc8414>
//! - OpenID Connect Discovery 1.0 <https://openid.net/specs/openid-connect-discovery-1_0.html>
//! - RFC 9207 <https://www.rfc-editor.org/rfc/rfc9207>

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use url::Url;

use crate::error::{Result, RpError};
use crate::protocol::scopes;

/// Metadata document describing an OAuth 2.0 / OIDC authorization server.
///
/// # Examples
///
/// ```
/// use rpflow::discovery::ServerConfiguration;
///
/// let json = r#"{
///     "issuer": "https://auth.example.com/",
///     "authorization_endpoint": "https://auth.example.com/authorize",
///     "token_endpoint": "https://auth.example.com/token",
///     "response_types_supported": ["code", "code id_token"],
///     "authorization_response_iss_parameter_supported": true
/// }"#;
///
/// let configuration: ServerConfiguration = serde_json::from_str(json).unwrap();
/// assert_eq!(configuration.issuer.as_str(), "https://auth.example.com/");
/// assert!(configuration.authorization_response_iss_parameter_supported);
/// assert!(configuration.grant_types_supported.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfiguration {
    /// The issuer identifier URI for this authorization server.
    pub issuer: Url,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<Url>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<Url>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<Url>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<Url>,

    #[serde(default)]
    pub grant_types_supported: Vec<String>,

    /// Space-joined response type combinations.
    #[serde(default)]
    pub response_types_supported: Vec<String>,

    #[serde(default)]
    pub response_modes_supported: Vec<String>,

    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,

    #[serde(default)]
    pub token_endpoint_auth_methods_supported: Vec<String>,

    #[serde(default)]
    pub scopes_supported: Vec<String>,

    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,

    /// RFC 9207: whether the server returns `iss` in authorization responses.
    #[serde(default)]
    pub authorization_response_iss_parameter_supported: bool,

    /// Additional server metadata fields not explicitly modelled above.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ServerConfiguration {
    /// Creates a document with only the issuer set.
    pub fn new(issuer: Url) -> Self {
        Self {
            issuer,
            authorization_endpoint: None,
            token_endpoint: None,
            userinfo_endpoint: None,
            jwks_uri: None,
            grant_types_supported: Vec::new(),
            response_types_supported: Vec::new(),
            response_modes_supported: Vec::new(),
            code_challenge_methods_supported: Vec::new(),
            token_endpoint_auth_methods_supported: Vec::new(),
            scopes_supported: Vec::new(),
            id_token_signing_alg_values_supported: Vec::new(),
            authorization_response_iss_parameter_supported: false,
            extra: HashMap::new(),
        }
    }

    /// Whether the server advertises OpenID Connect support.
    pub fn supports_openid(&self) -> bool {
        self.scopes_supported.iter().any(|s| s == scopes::OPENID)
            || !self.id_token_signing_alg_values_supported.is_empty()
    }
}

/// Returns `true` when `value` denotes the same issuer as `issuer`.
///
/// Both sides are compared in their parsed URL form so that a trailing slash
/// added by URL normalization does not count as a difference.
pub fn issuer_matches(value: &str, issuer: &Url) -> bool {
    Url::parse(value).map(|parsed| parsed == *issuer).unwrap_or(false)
}

/// Fails with an invariant violation when a fetched document does not belong
/// to the expected issuer (mix-up defense).
pub fn ensure_issuer(configuration: &ServerConfiguration, expected: &Url) -> Result<()> {
    if configuration.issuer != *expected {
        return Err(RpError::InvariantViolation(format!(
            "the configuration document retrieved for {} reports issuer {}",
            expected, configuration.issuer
        ))
        .into());
    }
    Ok(())
}

/// Source of server configuration documents.
///
/// Implementations own retrieval and caching and must be safe to call from
/// concurrent operations.
#[async_trait::async_trait]
pub trait ConfigurationProvider: Send + Sync + std::fmt::Debug {
    /// Returns the configuration document for `issuer`.
    ///
    /// # Errors
    ///
    /// Returns [`RpError::Config`] when no document is available.
    async fn get_configuration(&self, issuer: &Url) -> Result<ServerConfiguration>;
}

/// In-memory configuration provider fed from static documents.
///
/// # Examples
///
/// ```
/// use rpflow::discovery::{ConfigurationProvider, ServerConfiguration, StaticConfigurationProvider};
/// use url::Url;
///
/// # tokio_test::block_on(async {
/// let issuer = Url::parse("https://auth.example.com/").unwrap();
/// let provider = StaticConfigurationProvider::new(vec![ServerConfiguration::new(issuer.clone())]);
/// let configuration = provider.get_configuration(&issuer).await.unwrap();
/// assert_eq!(configuration.issuer, issuer);
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticConfigurationProvider {
    documents: Arc<RwLock<HashMap<Url, ServerConfiguration>>>,
}

impl StaticConfigurationProvider {
    pub fn new(documents: Vec<ServerConfiguration>) -> Self {
        let documents = documents
            .into_iter()
            .map(|document| (document.issuer.clone(), document))
            .collect();
        Self {
            documents: Arc::new(RwLock::new(documents)),
        }
    }

    /// Registers `document` under `key`. The key is normally the document's
    /// own issuer; tests use a different key to simulate a provider that
    /// returns a foreign document.
    pub async fn insert(&self, key: Url, document: ServerConfiguration) {
        self.documents.write().await.insert(key, document);
    }
}

#[async_trait::async_trait]
impl ConfigurationProvider for StaticConfigurationProvider {
    async fn get_configuration(&self, issuer: &Url) -> Result<ServerConfiguration> {
        self.documents
            .read()
            .await
            .get(issuer)
            .cloned()
            .ok_or_else(|| {
                RpError::Config(format!("no server configuration available for {issuer}")).into()
            })
    }
}
