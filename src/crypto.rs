//! Random values, PKCE derivation and token binding digests
//!
//! Everything the pipelines need from cryptography beyond signing, which is
//! the token dispatcher's business:
//!
//! - [`random_token`] for request-forgery-protection values, nonces and PKCE
//!   code verifiers (RFC 7636 section 4.1);
//! - [`code_challenge`] to derive the PKCE challenge sent to the
//!   authorization endpoint (RFC 7636 section 4.2);
//! - [`left_half_digest`] for the `at_hash` / `c_hash` identity token claims
//!   (OpenID Connect Core 3.3.2.11);
//! - [`fixed_time_eq`] for every comparison against a secret or a value an
//!   attacker may probe.
//!
//! # References
//!
//! - RFC 7636 <https://www.rfc-editor.org/rfc/rfc7636>
//! - OpenID Connect Core 1.0 <https://openid.net/specs/openid-connect-core-1_0.html>

use base64::Engine as _;
use sha2::{Digest, Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;

use crate::protocol::CodeChallengeMethod;

/// Number of random bytes behind every generated value (256 bits).
pub const RANDOM_VALUE_LENGTH: usize = 32;

// ---------------------------------------------------------------------------
// Random values
// ---------------------------------------------------------------------------

/// Returns `length` cryptographically random bytes encoded as base64url
/// without padding.
///
/// # Examples
///
/// ```
/// use rpflow::crypto::random_token;
///
/// let value = random_token(32);
/// // 32 bytes encode to 43 base64url characters.
/// assert_eq!(value.len(), 43);
/// assert_ne!(value, random_token(32));
/// ```
pub fn random_token(length: usize) -> String {
    use rand::RngCore as _;

    let mut bytes = vec![0u8; length];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

// ---------------------------------------------------------------------------
// PKCE
// ---------------------------------------------------------------------------

/// Derives the PKCE code challenge for `verifier`.
///
/// `S256` yields `BASE64URL(SHA256(ASCII(code_verifier)))`; `plain` yields
/// the verifier itself.
///
/// # Examples
///
/// ```
/// use rpflow::crypto::code_challenge;
/// use rpflow::protocol::CodeChallengeMethod;
///
/// let challenge = code_challenge(
///     "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk",
///     CodeChallengeMethod::S256,
/// );
/// assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
/// ```
pub fn code_challenge(verifier: &str, method: CodeChallengeMethod) -> String {
    match method {
        CodeChallengeMethod::S256 => {
            let digest = Sha256::digest(verifier.as_bytes());
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
        }
        CodeChallengeMethod::Plain => verifier.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Token binding digests
// ---------------------------------------------------------------------------

/// Computes the `at_hash` / `c_hash` value of `value` for an identity token
/// signed with `algorithm`.
///
/// The hash function is the one used by the JWS algorithm (SHA-256 for
/// `*256`, SHA-384 for `*384`, SHA-512 for `*512` and `EdDSA`); the left-most
/// half of the digest is base64url encoded. Returns `None` for algorithms
/// with no associated hash, `none` included.
///
/// # Examples
///
/// ```
/// use rpflow::crypto::left_half_digest;
///
/// // OpenID Connect Core A.3 / A.4 example values.
/// let at_hash = left_half_digest("jHkWEdUXMU1BwAsC4vtUsZwnNvTIxEl0z9K3vx5KF0Y", "RS256");
/// assert_eq!(at_hash.as_deref(), Some("77QmUPtjPfzWtF2AnpK9RQ"));
/// assert!(left_half_digest("value", "none").is_none());
/// ```
pub fn left_half_digest(value: &str, algorithm: &str) -> Option<String> {
    let digest: Vec<u8> = if algorithm == "EdDSA" || algorithm.ends_with("512") {
        Sha512::digest(value.as_bytes()).to_vec()
    } else if algorithm.ends_with("384") {
        Sha384::digest(value.as_bytes()).to_vec()
    } else if algorithm.ends_with("256") {
        Sha256::digest(value.as_bytes()).to_vec()
    } else {
        return None;
    };
    let half = &digest[..digest.len() / 2];
    Some(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(half))
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

/// Compares two strings in time independent of the position of the first
/// differing byte. Strings of different lengths compare unequal.
pub fn fixed_time_eq(left: &str, right: &str) -> bool {
    left.as_bytes().ct_eq(right.as_bytes()).into()
}
