//! Identity token claim checks
//!
//! Shared by the frontchannel and backchannel phases. Every check runs on a
//! principal the token dispatcher has already validated; these are the
//! OpenID Connect rules the dispatcher does not know about (expected
//! issuer, nonce, token binding digests).

use url::Url;

use crate::crypto::{fixed_time_eq, left_half_digest};
use crate::discovery::issuer_matches;
use crate::error::{Rejection, Verdict};
use crate::principal::Principal;
use crate::protocol::claims;

/// Claims that must be JSON strings when present.
const STRING_CLAIMS: [&str; 6] = [
    claims::ISSUER,
    claims::SUBJECT,
    claims::NONCE,
    claims::AUTHORIZED_PARTY,
    claims::ACCESS_TOKEN_HASH,
    claims::CODE_HASH,
];

/// Claims that must be a string or an array of strings when present.
const STRING_OR_ARRAY_CLAIMS: [&str; 2] = [claims::AUDIENCE, claims::AUTHENTICATION_METHOD_REFERENCE];

/// Claims that must be numeric dates when present.
const NUMERIC_CLAIMS: [&str; 4] = [
    claims::EXPIRES_AT,
    claims::ISSUED_AT,
    claims::NOT_BEFORE,
    claims::AUTHENTICATION_TIME,
];

/// Claims every identity token must carry.
const MANDATORY_CLAIMS: [&str; 5] = [
    claims::ISSUER,
    claims::SUBJECT,
    claims::AUDIENCE,
    claims::EXPIRES_AT,
    claims::ISSUED_AT,
];

/// What an identity token is checked against.
#[derive(Debug, Clone, Copy)]
pub struct IdentityTokenExpectations<'a> {
    pub issuer: &'a Url,
    pub client_id: &'a str,
    /// Nonce sent in the authorization request, if any.
    pub nonce: Option<&'a str>,
    /// Authorization code returned alongside the token, bound by `c_hash`.
    pub authorization_code: Option<&'a str>,
    /// Access token returned alongside the token, bound by `at_hash`.
    pub access_token: Option<&'a str>,
    /// Whether a missing digest claim is a failure (frontchannel) or only a
    /// present one is verified (backchannel).
    pub require_token_hashes: bool,
}

/// Checks the JSON shape of the registered claims.
pub fn validate_wellknown_claims(principal: &Principal) -> Verdict<()> {
    for name in STRING_CLAIMS {
        if let Some(value) = principal.claim(name) {
            if !value.is_string() {
                return Err(malformed(name));
            }
        }
    }

    for name in STRING_OR_ARRAY_CLAIMS {
        if let Some(value) = principal.claim(name) {
            let valid = match value {
                serde_json::Value::String(_) => true,
                serde_json::Value::Array(values) => values.iter().all(|v| v.is_string()),
                _ => false,
            };
            if !valid {
                return Err(malformed(name));
            }
        }
    }

    for name in NUMERIC_CLAIMS {
        if let Some(value) = principal.claim(name) {
            if !value.is_number() {
                return Err(malformed(name));
            }
        }
    }

    Ok(())
}

/// Runs every identity token check, in order: claim shapes, mandatory
/// claims, issuer, audience, authorized party, nonce, `at_hash`, `c_hash`.
pub fn validate_identity_token(
    principal: &Principal,
    expected: &IdentityTokenExpectations<'_>,
) -> Verdict<()> {
    validate_wellknown_claims(principal)?;

    for name in MANDATORY_CLAIMS {
        if !principal.has_claim(name) {
            return Err(Rejection::invalid_request(format!(
                "The mandatory '{name}' claim is missing from the identity token."
            )));
        }
    }

    let issuer_valid = principal
        .claim_str(claims::ISSUER)
        .map(|issuer| issuer_matches(issuer, expected.issuer))
        .unwrap_or(false);
    if !issuer_valid {
        return Err(Rejection::invalid_request(
            "The 'iss' claim of the identity token does not match the expected issuer.",
        ));
    }

    if !principal
        .claim_strs(claims::AUDIENCE)
        .contains(&expected.client_id)
    {
        return Err(Rejection::invalid_request(
            "The 'aud' claim of the identity token does not contain the client identifier.",
        ));
    }

    if let Some(presenter) = principal.claim_str(claims::AUTHORIZED_PARTY) {
        if presenter != expected.client_id {
            return Err(Rejection::invalid_request(
                "The 'azp' claim of the identity token does not match the client identifier.",
            ));
        }
    }

    if let Some(nonce) = expected.nonce {
        let valid = principal
            .claim_str(claims::NONCE)
            .map(|actual| fixed_time_eq(actual, nonce))
            .unwrap_or(false);
        if !valid {
            return Err(Rejection::invalid_request(
                "The 'nonce' claim of the identity token is missing or invalid.",
            ));
        }
    }

    if let Some(access_token) = expected.access_token {
        validate_digest(
            principal,
            claims::ACCESS_TOKEN_HASH,
            access_token,
            expected.require_token_hashes,
        )?;
    }

    if let Some(code) = expected.authorization_code {
        validate_digest(principal, claims::CODE_HASH, code, expected.require_token_hashes)?;
    }

    Ok(())
}

/// Checks that two identity tokens describe the same subject.
pub fn validate_same_subject(frontchannel: &Principal, backchannel: &Principal) -> Verdict<()> {
    match (
        frontchannel.claim_str(claims::SUBJECT),
        backchannel.claim_str(claims::SUBJECT),
    ) {
        (Some(front), Some(back)) if front == back => Ok(()),
        _ => Err(Rejection::invalid_request(
            "The 'sub' claim of the backchannel identity token does not match the frontchannel identity token.",
        )),
    }
}

fn validate_digest(principal: &Principal, claim: &str, value: &str, required: bool) -> Verdict<()> {
    let Some(actual) = principal.claim_str(claim) else {
        if required {
            return Err(Rejection::invalid_request(format!(
                "The mandatory '{claim}' claim is missing from the identity token."
            )));
        }
        return Ok(());
    };

    let expected = principal
        .algorithm()
        .and_then(|algorithm| left_half_digest(value, algorithm))
        .ok_or_else(|| {
            Rejection::invalid_request(format!(
                "The '{claim}' claim cannot be verified: the identity token signing algorithm has no associated hash."
            ))
        })?;

    if !fixed_time_eq(actual, &expected) {
        return Err(Rejection::invalid_request(format!(
            "The '{claim}' claim of the identity token is invalid."
        )));
    }
    Ok(())
}

fn malformed(name: &str) -> Rejection {
    Rejection::invalid_request(format!("The '{name}' claim of the identity token is malformed."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn issuer() -> Url {
        Url::parse("https://login.example.com/").unwrap()
    }

    fn token(extra: serde_json::Value) -> Principal {
        let mut claims = json!({
            "iss": "https://login.example.com/",
            "sub": "alice",
            "aud": ["client-a"],
            "exp": 1_900_000_000,
            "iat": 1_700_000_000,
            "nonce": "n-0S6_WzA2Mj"
        });
        if let (Some(base), serde_json::Value::Object(extra)) = (claims.as_object_mut(), extra) {
            base.extend(extra);
        }
        Principal::from_value(claims).unwrap().with_algorithm("RS256")
    }

    fn expectations(issuer: &Url) -> IdentityTokenExpectations<'_> {
        IdentityTokenExpectations {
            issuer,
            client_id: "client-a",
            nonce: Some("n-0S6_WzA2Mj"),
            authorization_code: None,
            access_token: None,
            require_token_hashes: true,
        }
    }

    fn description(verdict: Verdict<()>) -> String {
        verdict.unwrap_err().description.unwrap_or_default()
    }

    #[test]
    fn test_valid_token_passes() {
        let issuer = issuer();
        assert!(validate_identity_token(&token(json!({})), &expectations(&issuer)).is_ok());
    }

    #[test]
    fn test_wellknown_claims_validation_is_idempotent() {
        let issuer = issuer();
        let principal = token(json!({"amr": ["pwd", "otp"], "auth_time": 1_700_000_000}));
        for _ in 0..3 {
            assert!(validate_wellknown_claims(&principal).is_ok());
            assert!(validate_identity_token(&principal, &expectations(&issuer)).is_ok());
        }
    }

    #[test]
    fn test_malformed_claim_shapes_are_rejected() {
        for extra in [
            json!({"iss": ["https://login.example.com/"]}),
            json!({"aud": [1, 2]}),
            json!({"exp": "tomorrow"}),
            json!({"azp": 42}),
            json!({"amr": {"pwd": true}}),
        ] {
            assert!(validate_wellknown_claims(&token(extra)).is_err());
        }
    }

    #[test]
    fn test_missing_mandatory_claim_is_named() {
        let issuer = issuer();
        let mut principal = token(json!({}));
        principal.remove_claim("iat");
        assert!(description(validate_identity_token(&principal, &expectations(&issuer))).contains("'iat'"));
    }

    #[test]
    fn test_foreign_issuer_is_rejected() {
        let issuer = issuer();
        let principal = token(json!({"iss": "https://evil.example.com/"}));
        assert!(description(validate_identity_token(&principal, &expectations(&issuer))).contains("'iss'"));
    }

    #[test]
    fn test_audience_must_contain_client() {
        let issuer = issuer();
        let principal = token(json!({"aud": "client-b"}));
        assert!(description(validate_identity_token(&principal, &expectations(&issuer))).contains("'aud'"));
    }

    #[test]
    fn test_authorized_party_must_be_client() {
        let issuer = issuer();
        let ok = token(json!({"aud": ["client-a", "api"], "azp": "client-a"}));
        assert!(validate_identity_token(&ok, &expectations(&issuer)).is_ok());
        let bad = token(json!({"azp": "client-b"}));
        assert!(description(validate_identity_token(&bad, &expectations(&issuer))).contains("'azp'"));
    }

    #[test]
    fn test_nonce_mismatch_or_absence_is_rejected() {
        let issuer = issuer();
        let wrong = token(json!({"nonce": "other"}));
        assert!(description(validate_identity_token(&wrong, &expectations(&issuer))).contains("'nonce'"));
        let mut missing = token(json!({}));
        missing.remove_claim("nonce");
        assert!(validate_identity_token(&missing, &expectations(&issuer)).is_err());
    }

    #[test]
    fn test_c_hash_binds_authorization_code() {
        let issuer = issuer();
        let code = "Qcb0Orv1zh30vL1MPRsbm-diHiMwcLyZvn1arpZv-Jxf_11jnpEX3Tgfvk";
        let expected = IdentityTokenExpectations {
            authorization_code: Some(code),
            ..expectations(&issuer)
        };

        let valid = token(json!({"c_hash": "LDktKdoQak3Pk0cnXxCltA"}));
        assert!(validate_identity_token(&valid, &expected).is_ok());

        let tampered = token(json!({"c_hash": "LDktKdoQak3Pk0cnXxCltB"}));
        let rejection = validate_identity_token(&tampered, &expected).unwrap_err();
        assert_eq!(rejection.error, "invalid_request");
        assert!(rejection.description.unwrap().contains("c_hash"));
    }

    #[test]
    fn test_at_hash_required_in_frontchannel_only() {
        let issuer = issuer();
        let frontchannel = IdentityTokenExpectations {
            access_token: Some("jHkWEdUXMU1BwAsC4vtUsZwnNvTIxEl0z9K3vx5KF0Y"),
            ..expectations(&issuer)
        };
        let principal = token(json!({}));
        assert!(description(validate_identity_token(&principal, &frontchannel)).contains("'at_hash'"));

        let backchannel = IdentityTokenExpectations {
            require_token_hashes: false,
            ..frontchannel
        };
        assert!(validate_identity_token(&principal, &backchannel).is_ok());

        let bound = token(json!({"at_hash": "77QmUPtjPfzWtF2AnpK9RQ"}));
        assert!(validate_identity_token(&bound, &backchannel).is_ok());
    }

    #[test]
    fn test_digest_requires_known_algorithm() {
        let issuer = issuer();
        let principal = token(json!({"c_hash": "LDktKdoQak3Pk0cnXxCltA"})).with_algorithm("none");
        let expected = IdentityTokenExpectations {
            authorization_code: Some("code"),
            ..expectations(&issuer)
        };
        assert!(validate_identity_token(&principal, &expected).is_err());
    }

    #[test]
    fn test_same_subject() {
        let alice = token(json!({}));
        let bob = token(json!({"sub": "bob"}));
        assert!(validate_same_subject(&alice, &alice.clone()).is_ok());
        assert!(validate_same_subject(&alice, &bob).is_err());
    }
}
