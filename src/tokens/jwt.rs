//! JWT-backed token dispatcher
//!
//! State tokens are compact JWS values signed with HS256 under a key owned
//! by this relying party. They carry a dedicated `typ` header so that no
//! other JWT can be replayed as a state token, and each token id (`jti`) is
//! accepted once: redeemed ids are remembered until the token would have
//! expired anyway.
//!
//! Identity tokens and signed userinfo responses are verified either with
//! the client secret (HS256/384/512) or with the authorization server's JSON
//! Web Key Set. Key sets are cached per issuer and refreshed when a token
//! references an unknown key id, at most once per
//! [`KEY_SET_REFRESH_INTERVAL_SECS`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use url::Url;

use crate::discovery::{issuer_matches, ServerConfiguration};
use crate::error::{Rejection, Result, RpError, Verdict};
use crate::principal::Principal;
use crate::protocol::{claims, TokenKind};
use crate::registration::ClientRegistration;
use crate::tokens::{TokenDispatcher, TokenValidationRequest};

/// `typ` header value of state tokens.
pub const STATE_TOKEN_TYPE: &str = "oauth-state+jwt";

/// Minimum delay between two downloads of the key set of one issuer.
pub const KEY_SET_REFRESH_INTERVAL_SECS: i64 = 60;

struct CachedKeySet {
    keys: JwkSet,
    fetched_at: DateTime<Utc>,
}

/// Token dispatcher built on `jsonwebtoken`.
pub struct JwtTokenDispatcher {
    state_key: Vec<u8>,
    state_lifetime: Duration,
    http: reqwest::Client,
    key_sets: RwLock<HashMap<Url, CachedKeySet>>,
    redeemed: Mutex<HashMap<String, i64>>,
}

impl std::fmt::Debug for JwtTokenDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtTokenDispatcher")
            .field("state_key", &"<redacted>")
            .field("state_lifetime", &self.state_lifetime)
            .finish_non_exhaustive()
    }
}

impl JwtTokenDispatcher {
    /// Creates a dispatcher.
    ///
    /// # Arguments
    ///
    /// * `state_key` - HS256 key for state tokens
    /// * `state_lifetime` - Validity period stamped on generated state tokens
    /// * `http` - Client used to download key sets
    pub fn new(state_key: impl Into<Vec<u8>>, state_lifetime: Duration, http: reqwest::Client) -> Self {
        Self {
            state_key: state_key.into(),
            state_lifetime,
            http,
            key_sets: RwLock::new(HashMap::new()),
            redeemed: Mutex::new(HashMap::new()),
        }
    }

    fn generate_state_token(&self, principal: &Principal) -> Result<String> {
        if self.state_key.is_empty() {
            return Err(RpError::Config("no state token signing key is configured".to_string()).into());
        }

        let now = Utc::now().timestamp();
        let lifetime = i64::try_from(self.state_lifetime.as_secs())
            .map_err(|_| RpError::Config("state token lifetime is out of range".to_string()))?;

        let mut claims = principal.claims().clone();
        claims.insert(claims::JWT_ID.to_string(), uuid::Uuid::new_v4().to_string().into());
        claims.insert(claims::ISSUED_AT.to_string(), now.into());
        claims.insert(claims::EXPIRES_AT.to_string(), (now + lifetime).into());

        let mut header = Header::new(Algorithm::HS256);
        header.typ = Some(STATE_TOKEN_TYPE.to_string());

        encode(&header, &claims, &EncodingKey::from_secret(&self.state_key))
            .map_err(|e| RpError::TokenDispatch(format!("failed to sign state token: {e}")).into())
    }

    fn validate_state_token(&self, token: &str) -> Result<Verdict<Principal>> {
        let header = match decode_header(token) {
            Ok(header) => header,
            Err(_) => return Ok(Err(Rejection::invalid_token("The state token is malformed."))),
        };
        if header.alg != Algorithm::HS256 || header.typ.as_deref() != Some(STATE_TOKEN_TYPE) {
            return Ok(Err(Rejection::invalid_token(
                "The specified token is not a state token.",
            )));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&[claims::EXPIRES_AT]);

        let data = match decode::<Map<String, Value>>(
            token,
            &DecodingKey::from_secret(&self.state_key),
            &validation,
        ) {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!(reason = %e, "State token validation failed");
                return Ok(Err(Rejection::invalid_token(
                    "The state token is invalid or has expired.",
                )));
            }
        };

        let token_id = data.claims.get(claims::JWT_ID).and_then(Value::as_str);
        let expires_at = data.claims.get(claims::EXPIRES_AT).and_then(Value::as_i64);
        let (Some(token_id), Some(expires_at)) = (token_id, expires_at) else {
            return Ok(Err(Rejection::invalid_token(
                "The state token has no identifier or expiration date.",
            )));
        };

        if !self.redeem(token_id, expires_at)? {
            return Ok(Err(Rejection::invalid_token(
                "The state token has already been redeemed.",
            )));
        }

        Ok(Ok(Principal::from_claims(data.claims)
            .with_kind(TokenKind::State)
            .with_algorithm("HS256")))
    }

    /// Records `token_id` as used. Returns `false` when it already was.
    fn redeem(&self, token_id: &str, expires_at: i64) -> Result<bool> {
        let now = Utc::now().timestamp();
        let mut redeemed = self
            .redeemed
            .lock()
            .map_err(|_| RpError::TokenDispatch("redeemed state token registry is poisoned".to_string()))?;
        redeemed.retain(|_, expiry| *expiry >= now);
        if redeemed.contains_key(token_id) {
            return Ok(false);
        }
        redeemed.insert(token_id.to_string(), expires_at);
        Ok(true)
    }

    async fn validate_signed_token(
        &self,
        kind: TokenKind,
        request: TokenValidationRequest<'_>,
    ) -> Result<Verdict<Principal>> {
        let registration = request.registration.ok_or_else(|| {
            RpError::InvariantViolation(format!("validating a {kind} requires a client registration"))
        })?;
        let configuration = request.configuration.ok_or_else(|| {
            RpError::InvariantViolation(format!("validating a {kind} requires a server configuration"))
        })?;

        let header = match decode_header(request.token) {
            Ok(header) => header,
            Err(_) => return Ok(Err(Rejection::invalid_token(format!("The {kind} is malformed.")))),
        };
        let algorithm = algorithm_name(header.alg);

        if kind == TokenKind::IdentityToken
            && !configuration.id_token_signing_alg_values_supported.is_empty()
            && !configuration
                .id_token_signing_alg_values_supported
                .iter()
                .any(|supported| supported == &algorithm)
        {
            return Ok(Err(Rejection::invalid_token(format!(
                "The {kind} is signed with an algorithm the server does not advertise."
            ))));
        }

        let key = match header.alg {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                match registration.client_secret.as_deref() {
                    Some(secret) => DecodingKey::from_secret(secret.as_bytes()),
                    None => {
                        return Ok(Err(Rejection::invalid_token(format!(
                            "The {kind} uses a symmetric signature but the client has no secret."
                        ))))
                    }
                }
            }
            _ => match self.resolve_key(configuration, header.kid.as_deref()).await? {
                Some(key) => key,
                None => {
                    return Ok(Err(Rejection::invalid_token(format!(
                        "No signing key of the authorization server matches the {kind}."
                    ))))
                }
            },
        };

        let mut validation = Validation::new(header.alg);
        validation.validate_aud = false;
        let required: &[&str] = if kind == TokenKind::IdentityToken {
            &[claims::EXPIRES_AT]
        } else {
            &[]
        };
        validation.set_required_spec_claims(required);

        let data = match decode::<Map<String, Value>>(request.token, &key, &validation) {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!(kind = %kind, reason = %e, "Token signature validation failed");
                return Ok(Err(Rejection::invalid_token(format!(
                    "The {kind} signature or lifetime is invalid."
                ))));
            }
        };

        let principal = Principal::from_claims(data.claims)
            .with_kind(kind)
            .with_algorithm(algorithm);

        if let Some(rejection) = check_issuer_and_audience(&principal, kind, registration, configuration) {
            return Ok(Err(rejection));
        }

        Ok(Ok(principal))
    }

    /// Finds the verification key for `kid`, refreshing the cached key set
    /// of the issuer when no cached key matches and the last download is
    /// older than [`KEY_SET_REFRESH_INTERVAL_SECS`].
    async fn resolve_key(
        &self,
        configuration: &ServerConfiguration,
        kid: Option<&str>,
    ) -> Result<Option<DecodingKey>> {
        let Some(jwks_uri) = configuration.jwks_uri.as_ref() else {
            return Ok(None);
        };

        if let Some(cached) = self.key_sets.read().await.get(&configuration.issuer) {
            if let Some(jwk) = select_key(&cached.keys, kid) {
                return decoding_key(jwk).map(Some);
            }
            let age = Utc::now().signed_duration_since(cached.fetched_at);
            if age.num_seconds() < KEY_SET_REFRESH_INTERVAL_SECS {
                tracing::debug!(
                    issuer = %configuration.issuer,
                    kid = kid.unwrap_or_default(),
                    "Unknown key id, key set was refreshed recently"
                );
                return Ok(None);
            }
        }

        tracing::debug!(issuer = %configuration.issuer, jwks_uri = %jwks_uri, "Fetching key set");
        let set: JwkSet = self
            .http
            .get(jwks_uri.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let key = select_key(&set, kid).map(decoding_key).transpose()?;
        self.key_sets.write().await.insert(
            configuration.issuer.clone(),
            CachedKeySet {
                keys: set,
                fetched_at: Utc::now(),
            },
        );
        Ok(key)
    }
}

#[async_trait::async_trait]
impl TokenDispatcher for JwtTokenDispatcher {
    async fn validate_token(&self, request: TokenValidationRequest<'_>) -> Result<Verdict<Principal>> {
        if request.kinds.contains(&TokenKind::State) {
            return self.validate_state_token(request.token);
        }
        for kind in [TokenKind::IdentityToken, TokenKind::UserinfoToken] {
            if request.kinds.contains(&kind) {
                return self.validate_signed_token(kind, request).await;
            }
        }
        Err(RpError::TokenDispatch(format!(
            "validation of {:?} tokens is not supported",
            request.kinds
        ))
        .into())
    }

    async fn generate_token(&self, principal: &Principal, kind: TokenKind) -> Result<Verdict<String>> {
        match kind {
            TokenKind::State => self.generate_state_token(principal).map(Ok),
            other => Err(RpError::TokenDispatch(format!("generation of {other} tokens is not supported")).into()),
        }
    }
}

fn algorithm_name(algorithm: Algorithm) -> String {
    format!("{algorithm:?}")
}

fn select_key<'a>(set: &'a JwkSet, kid: Option<&str>) -> Option<&'a Jwk> {
    match kid {
        Some(kid) => set.find(kid),
        None => match set.keys.as_slice() {
            [only] => Some(only),
            _ => None,
        },
    }
}

fn decoding_key(jwk: &Jwk) -> Result<DecodingKey> {
    DecodingKey::from_jwk(jwk)
        .map_err(|e| RpError::TokenDispatch(format!("unusable key in key set: {e}")).into())
}

fn check_issuer_and_audience(
    principal: &Principal,
    kind: TokenKind,
    registration: &ClientRegistration,
    configuration: &ServerConfiguration,
) -> Option<Rejection> {
    if let Some(issuer) = principal.claim(claims::ISSUER) {
        let matches = issuer
            .as_str()
            .map(|issuer| issuer_matches(issuer, &configuration.issuer))
            .unwrap_or(false);
        if !matches {
            return Some(Rejection::invalid_token(format!(
                "The {kind} was issued by another authorization server."
            )));
        }
    }

    let audience_required = kind == TokenKind::IdentityToken;
    if audience_required || principal.has_claim(claims::AUDIENCE) {
        let audiences = principal.claim_strs(claims::AUDIENCE);
        if !audiences.contains(&registration.client_id.as_str()) {
            return Some(Rejection::invalid_token(format!(
                "The {kind} is not intended for this client."
            )));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn dispatcher() -> JwtTokenDispatcher {
        JwtTokenDispatcher::new(KEY, Duration::from_secs(900), reqwest::Client::new())
    }

    fn registration() -> ClientRegistration {
        let mut registration =
            ClientRegistration::new(Url::parse("https://login.example.com/").unwrap(), "client-a");
        registration.client_secret = Some("client-secret-with-enough-entropy".to_string());
        registration
    }

    fn configuration() -> ServerConfiguration {
        ServerConfiguration::new(Url::parse("https://login.example.com/").unwrap())
    }

    fn sign(claims: Value, secret: &[u8]) -> String {
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    async fn validate_state(dispatcher: &JwtTokenDispatcher, token: &str) -> Verdict<Principal> {
        dispatcher
            .validate_token(TokenValidationRequest::new(token, &[TokenKind::State]))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_state_token_round_trip_stamps_identity_and_dates() {
        let dispatcher = dispatcher();
        let mut principal = Principal::new();
        principal.set_claim("authorization_server", "https://login.example.com/");

        let token = dispatcher
            .generate_token(&principal, TokenKind::State)
            .await
            .unwrap()
            .unwrap();
        let validated = validate_state(&dispatcher, &token).await.unwrap();

        assert_eq!(validated.kind(), Some(TokenKind::State));
        assert_eq!(
            validated.claim_str("authorization_server"),
            Some("https://login.example.com/")
        );
        assert!(validated.claim_str("jti").is_some());
        let iat = validated.claim_i64("iat").unwrap();
        assert_eq!(validated.claim_i64("exp").unwrap() - iat, 900);
    }

    #[tokio::test]
    async fn test_state_token_is_single_use() {
        let dispatcher = dispatcher();
        let token = dispatcher
            .generate_token(&Principal::new(), TokenKind::State)
            .await
            .unwrap()
            .unwrap();
        assert!(validate_state(&dispatcher, &token).await.is_ok());
        let rejection = validate_state(&dispatcher, &token).await.unwrap_err();
        assert_eq!(rejection.error, "invalid_token");
    }

    #[tokio::test]
    async fn test_state_token_requires_state_typ() {
        let dispatcher = dispatcher();
        let forged = sign(json!({"jti": "x", "exp": Utc::now().timestamp() + 60}), KEY);
        assert!(validate_state(&dispatcher, &forged).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_state_token_is_rejected() {
        let dispatcher = dispatcher();
        let mut header = Header::new(Algorithm::HS256);
        header.typ = Some(STATE_TOKEN_TYPE.to_string());
        let token = encode(
            &header,
            &json!({"jti": "expired", "exp": Utc::now().timestamp() - 10}),
            &EncodingKey::from_secret(KEY),
        )
        .unwrap();
        assert!(validate_state(&dispatcher, &token).await.is_err());
    }

    #[tokio::test]
    async fn test_state_token_signed_with_other_key_is_rejected() {
        let other = JwtTokenDispatcher::new(
            b"another-key-another-key-another-key".to_vec(),
            Duration::from_secs(900),
            reqwest::Client::new(),
        );
        let token = other
            .generate_token(&Principal::new(), TokenKind::State)
            .await
            .unwrap()
            .unwrap();
        assert!(validate_state(&dispatcher(), &token).await.is_err());
    }

    #[tokio::test]
    async fn test_generate_without_key_is_config_error() {
        let dispatcher = JwtTokenDispatcher::new(Vec::new(), Duration::from_secs(60), reqwest::Client::new());
        let err = dispatcher
            .generate_token(&Principal::new(), TokenKind::State)
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<RpError>(), Some(RpError::Config(_))));
    }

    #[tokio::test]
    async fn test_identity_token_with_client_secret() {
        let registration = registration();
        let configuration = configuration();
        let token = sign(
            json!({
                "iss": "https://login.example.com",
                "sub": "alice",
                "aud": "client-a",
                "exp": Utc::now().timestamp() + 300,
                "iat": Utc::now().timestamp()
            }),
            b"client-secret-with-enough-entropy",
        );
        let principal = dispatcher()
            .validate_token(
                TokenValidationRequest::new(&token, &[TokenKind::IdentityToken])
                    .with_registration(&registration)
                    .with_configuration(&configuration),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(principal.algorithm(), Some("HS256"));
        assert_eq!(principal.kind(), Some(TokenKind::IdentityToken));
        assert_eq!(principal.claim_str("sub"), Some("alice"));
    }

    #[tokio::test]
    async fn test_identity_token_for_other_audience_is_rejected() {
        let registration = registration();
        let configuration = configuration();
        let token = sign(
            json!({"iss": "https://login.example.com/", "sub": "alice", "aud": "client-b", "exp": Utc::now().timestamp() + 300}),
            b"client-secret-with-enough-entropy",
        );
        let rejection = dispatcher()
            .validate_token(
                TokenValidationRequest::new(&token, &[TokenKind::IdentityToken])
                    .with_registration(&registration)
                    .with_configuration(&configuration),
            )
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(rejection.error, "invalid_token");
    }

    #[tokio::test]
    async fn test_identity_token_from_other_issuer_is_rejected() {
        let registration = registration();
        let configuration = configuration();
        let token = sign(
            json!({"iss": "https://evil.example.com/", "sub": "alice", "aud": "client-a", "exp": Utc::now().timestamp() + 300}),
            b"client-secret-with-enough-entropy",
        );
        let verdict = dispatcher()
            .validate_token(
                TokenValidationRequest::new(&token, &[TokenKind::IdentityToken])
                    .with_registration(&registration)
                    .with_configuration(&configuration),
            )
            .await
            .unwrap();
        assert!(verdict.is_err());
    }

    #[tokio::test]
    async fn test_asymmetric_token_without_jwks_uri_is_rejected() {
        let registration = registration();
        let configuration = configuration();
        // Header only needs to decode: {"alg":"RS256","typ":"JWT"}
        let token = "eyJhbGciOiJSUzI1NiIsInR5cCI6IkpXVCJ9.e30.c2ln";
        let verdict = dispatcher()
            .validate_token(
                TokenValidationRequest::new(token, &[TokenKind::IdentityToken])
                    .with_registration(&registration)
                    .with_configuration(&configuration),
            )
            .await
            .unwrap();
        assert!(verdict.is_err());
    }

    #[tokio::test]
    async fn test_identity_token_requires_registration() {
        let err = dispatcher()
            .validate_token(TokenValidationRequest::new("a.b.c", &[TokenKind::IdentityToken]))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RpError>(),
            Some(RpError::InvariantViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_opaque_kinds_are_not_supported() {
        let err = dispatcher()
            .validate_token(TokenValidationRequest::new("opaque", &[TokenKind::AccessToken]))
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<RpError>(), Some(RpError::TokenDispatch(_))));
    }

    fn token_with_key_id(kid: &str) -> String {
        use base64::Engine;
        let header = json!({"alg": "RS256", "typ": "JWT", "kid": kid}).to_string();
        format!(
            "{}.e30.c2ln",
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(header)
        )
    }

    #[tokio::test]
    async fn test_unknown_key_ids_refresh_key_set_once_per_interval() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"keys": []})))
            .expect(1)
            .mount(&server)
            .await;

        let registration = registration();
        let mut configuration = configuration();
        configuration.jwks_uri = Some(Url::parse(&format!("{}/jwks", server.uri())).unwrap());
        let dispatcher = dispatcher();

        for kid in ["unknown-1", "unknown-2", "unknown-3"] {
            let token = token_with_key_id(kid);
            let verdict = dispatcher
                .validate_token(
                    TokenValidationRequest::new(&token, &[TokenKind::IdentityToken])
                        .with_registration(&registration)
                        .with_configuration(&configuration),
                )
                .await
                .unwrap();
            assert_eq!(verdict.unwrap_err().error, "invalid_token");
        }

        server.verify().await;
    }
}
