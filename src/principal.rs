//! Token principals
//!
//! A [`Principal`] is the claim set produced by the token dispatcher after a
//! token has been validated (or, for state tokens, the claim set handed to it
//! for signing). It also records which kind of token it came from and the
//! JWS algorithm the token was signed with, which the identity-token digest
//! checks depend on.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::protocol::TokenKind;

/// A validated claim set.
///
/// # Examples
///
/// ```
/// use rpflow::principal::Principal;
/// use serde_json::json;
///
/// let principal = Principal::from_value(json!({
///     "sub": "alice",
///     "aud": ["client-a", "client-b"],
///     "exp": 1_700_000_000
/// }))
/// .unwrap();
///
/// assert_eq!(principal.claim_str("sub"), Some("alice"));
/// assert_eq!(principal.claim_strs("aud"), vec!["client-a", "client-b"]);
/// assert_eq!(principal.claim_i64("exp"), Some(1_700_000_000));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    claims: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kind: Option<TokenKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    algorithm: Option<String>,
}

impl Principal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_claims(claims: Map<String, Value>) -> Self {
        Self {
            claims,
            kind: None,
            algorithm: None,
        }
    }

    /// Builds a principal from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(claims) => Some(Self::from_claims(claims)),
            _ => None,
        }
    }

    pub fn with_kind(mut self, kind: TokenKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = Some(algorithm.into());
        self
    }

    pub fn kind(&self) -> Option<TokenKind> {
        self.kind
    }

    /// JWS `alg` of the token this principal was extracted from, if any.
    pub fn algorithm(&self) -> Option<&str> {
        self.algorithm.as_deref()
    }

    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    pub fn into_claims(self) -> Map<String, Value> {
        self.claims
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    pub fn has_claim(&self, name: &str) -> bool {
        self.claims.contains_key(name)
    }

    /// Returns the claim as a string when it is a JSON string.
    pub fn claim_str(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Value::as_str)
    }

    /// Returns the string values of a claim that is either a single string
    /// or an array of strings. Non-string array members are skipped.
    pub fn claim_strs(&self, name: &str) -> Vec<&str> {
        match self.claims.get(name) {
            Some(Value::String(value)) => vec![value.as_str()],
            Some(Value::Array(values)) => values.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Returns the claim as an integer when it is a JSON number.
    pub fn claim_i64(&self, name: &str) -> Option<i64> {
        let value = self.claims.get(name)?;
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|number| number as i64))
    }

    pub fn set_claim(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.claims.insert(name.into(), value.into());
    }

    pub fn remove_claim(&mut self, name: &str) -> Option<Value> {
        self.claims.remove(name)
    }

    /// Copies every claim of `other` that this principal does not already
    /// carry.
    pub fn merge_missing(&mut self, other: &Principal) {
        for (name, value) in &other.claims {
            if !self.claims.contains_key(name) {
                self.claims.insert(name.clone(), value.clone());
            }
        }
    }
}
