//! State token claims
//!
//! The state token carries every per-demand value the authentication
//! pipeline needs after the redirect round trip. [`StateTokenClaims`] maps
//! those values to and from the private claims of the [`Principal`] handed to
//! the token dispatcher. Token identity and date claims (`jti`, `iat`, `exp`)
//! are stamped by the dispatcher when the token is generated and are never
//! written here.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use url::Url;

use crate::error::{Result, RpError};
use crate::principal::Principal;
use crate::protocol::{claims, GrantType, ResponseType};

/// Private claim names used inside state tokens.
pub mod claim_names {
    pub const AUTHORIZATION_SERVER: &str = "authorization_server";
    pub const CODE_VERIFIER: &str = "code_verifier";
    pub const GRANT_TYPE: &str = "grant_type";
    pub const NONCE: &str = "nonce";
    pub const REDIRECT_URI: &str = "redirect_uri";
    pub const REQUEST_FORGERY_PROTECTION: &str = "rfp";
    pub const RESPONSE_TYPE: &str = "response_type";
    pub const SCOPE: &str = "scope";
    pub const TARGET_LINK_URI: &str = "target_link_uri";
}

/// Claims a caller-supplied base principal may not pass on to a state token.
pub const NON_INHERITABLE_CLAIMS: [&str; 4] = [
    claims::JWT_ID,
    claims::ISSUED_AT,
    claims::EXPIRES_AT,
    claims::NOT_BEFORE,
];

/// Values round-tripped through the client inside the state token.
#[derive(Debug, Clone, PartialEq)]
pub struct StateTokenClaims {
    pub issuer: Url,
    pub request_forgery_protection: String,
    pub target_link_uri: Option<String>,
    pub grant_type: GrantType,
    pub response_type: ResponseType,
    pub redirect_uri: Option<Url>,
    pub code_verifier: Option<String>,
    pub nonce: Option<String>,
    pub scopes: Vec<String>,
    /// Stamped by the dispatcher; `None` until the token has been issued.
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl StateTokenClaims {
    /// Writes the claims into `principal`, replacing existing values.
    pub fn apply_to(&self, principal: &mut Principal) {
        use claim_names::*;

        principal.set_claim(AUTHORIZATION_SERVER, self.issuer.as_str());
        principal.set_claim(REQUEST_FORGERY_PROTECTION, self.request_forgery_protection.as_str());
        principal.set_claim(GRANT_TYPE, self.grant_type.as_str());
        principal.set_claim(RESPONSE_TYPE, self.response_type.to_string());
        principal.set_claim(SCOPE, self.scopes.clone());

        let optional = [
            (TARGET_LINK_URI, self.target_link_uri.clone()),
            (REDIRECT_URI, self.redirect_uri.as_ref().map(Url::to_string)),
            (CODE_VERIFIER, self.code_verifier.clone()),
            (NONCE, self.nonce.clone()),
        ];
        for (name, value) in optional {
            match value {
                Some(value) => principal.set_claim(name, value),
                None => {
                    principal.remove_claim(name);
                }
            }
        }
    }

    /// Reads the claims back from a validated state token principal.
    ///
    /// # Errors
    ///
    /// Returns [`RpError::InvariantViolation`] when a claim written at
    /// challenge time is missing or malformed: the token was validated, so
    /// its content is ours.
    pub fn from_principal(principal: &Principal) -> Result<Self> {
        use claim_names::*;

        let issuer = required(principal, AUTHORIZATION_SERVER)?;
        let issuer = Url::parse(issuer).map_err(|_| malformed(AUTHORIZATION_SERVER))?;
        let grant_type = required(principal, GRANT_TYPE)?
            .parse::<GrantType>()
            .map_err(|_| malformed(GRANT_TYPE))?;
        let response_type = required(principal, RESPONSE_TYPE)?
            .parse::<ResponseType>()
            .map_err(|_| malformed(RESPONSE_TYPE))?;
        let redirect_uri = principal
            .claim_str(REDIRECT_URI)
            .map(Url::parse)
            .transpose()
            .map_err(|_| malformed(REDIRECT_URI))?;

        Ok(Self {
            issuer,
            request_forgery_protection: required(principal, REQUEST_FORGERY_PROTECTION)?
                .to_string(),
            target_link_uri: principal.claim_str(TARGET_LINK_URI).map(str::to_string),
            grant_type,
            response_type,
            redirect_uri,
            code_verifier: principal.claim_str(CODE_VERIFIER).map(str::to_string),
            nonce: principal.claim_str(NONCE).map(str::to_string),
            scopes: principal
                .claim_strs(SCOPE)
                .into_iter()
                .map(str::to_string)
                .collect(),
            issued_at: timestamp(principal, claims::ISSUED_AT),
            expires_at: timestamp(principal, claims::EXPIRES_AT),
        })
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Builds the base of a state token principal from a caller-supplied
/// principal, dropping token identity and date claims.
pub fn base_principal(base: Option<&Principal>) -> Principal {
    let mut principal = base.cloned().unwrap_or_default();
    for name in NON_INHERITABLE_CLAIMS {
        principal.remove_claim(name);
    }
    principal
}

fn required<'a>(principal: &'a Principal, name: &str) -> Result<&'a str> {
    principal.claim_str(name).ok_or_else(|| {
        RpError::InvariantViolation(format!("the state token has no '{name}' claim")).into()
    })
}

fn malformed(name: &str) -> anyhow::Error {
    RpError::InvariantViolation(format!("the state token '{name}' claim is malformed")).into()
}

fn timestamp(principal: &Principal, name: &str) -> Option<DateTime<Utc>> {
    match principal.claim(name) {
        Some(Value::Number(_)) => principal
            .claim_i64(name)
            .and_then(|seconds| Utc.timestamp_opt(seconds, 0).single()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> StateTokenClaims {
        StateTokenClaims {
            issuer: Url::parse("https://login.example.com/").unwrap(),
            request_forgery_protection: "rfp-value".to_string(),
            target_link_uri: Some("https://app.example.com/home".to_string()),
            grant_type: GrantType::AuthorizationCode,
            response_type: ResponseType::CODE_ID_TOKEN,
            redirect_uri: Some(Url::parse("https://app.example.com/callback").unwrap()),
            code_verifier: Some("verifier".to_string()),
            nonce: Some("nonce".to_string()),
            scopes: vec!["openid".to_string(), "profile".to_string()],
            issued_at: None,
            expires_at: None,
        }
    }

    #[test]
    fn test_apply_then_read_restores_values() {
        let claims = sample();
        let mut principal = Principal::new();
        claims.apply_to(&mut principal);
        assert_eq!(StateTokenClaims::from_principal(&principal).unwrap(), claims);
    }

    #[test]
    fn test_apply_removes_absent_optional_claims() {
        let mut principal = Principal::new();
        principal.set_claim(claim_names::NONCE, "stale");
        let claims = StateTokenClaims {
            nonce: None,
            ..sample()
        };
        claims.apply_to(&mut principal);
        assert!(!principal.has_claim(claim_names::NONCE));
    }

    #[test]
    fn test_from_principal_missing_issuer_is_invariant_violation() {
        let mut principal = Principal::new();
        sample().apply_to(&mut principal);
        principal.remove_claim(claim_names::AUTHORIZATION_SERVER);
        let err = StateTokenClaims::from_principal(&principal).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RpError>(),
            Some(RpError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_from_principal_reads_timestamps() {
        let mut principal = Principal::new();
        sample().apply_to(&mut principal);
        principal.set_claim("iat", 1_700_000_000);
        principal.set_claim("exp", 1_700_000_900);
        let claims = StateTokenClaims::from_principal(&principal).unwrap();
        assert_eq!(claims.issued_at.unwrap().timestamp(), 1_700_000_000);
        assert_eq!(claims.expires_at.unwrap().timestamp(), 1_700_000_900);
    }

    #[test]
    fn test_base_principal_drops_identity_and_date_claims() {
        let base = Principal::from_value(json!({
            "sub": "alice",
            "jti": "old",
            "iat": 1,
            "exp": 2,
            "nbf": 1
        }))
        .unwrap();
        let principal = base_principal(Some(&base));
        assert_eq!(principal.claim_str("sub"), Some("alice"));
        for name in NON_INHERITABLE_CLAIMS {
            assert!(!principal.has_claim(name), "{name} should be dropped");
        }
    }
}
