//! `reqwest` backchannel transport
//!
//! Token requests are `application/x-www-form-urlencoded` POSTs. Client
//! credentials are applied per the negotiated method:
//!
//! - `client_secret_basic`: HTTP Basic with the form-encoded client id and
//!   secret (RFC 6749 section 2.3.1);
//! - `client_secret_post`: `client_id` and `client_secret` in the body;
//! - `none`: `client_id` in the body.
//!
//! Userinfo requests are bearer GETs. Error answers are surfaced as response
//! parameters, read from a JSON body or from the `WWW-Authenticate` bearer
//! challenge.

use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use serde_json::{Map, Value};

use crate::error::{Result, RpError};
use crate::principal::Principal;
use crate::protocol::{parameters, ClientAuthenticationMethod, TokenKind};
use crate::registration::ClientRegistration;
use crate::transport::{
    ResponseParameters, TokenRequest, TokenResponse, Transport, UserinfoRequest, UserinfoResponse,
};

const JWT_CONTENT_TYPE: &str = "application/jwt";

/// Backchannel transport over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Builds a transport with its own client.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Per-request timeout
    /// * `user_agent` - `User-Agent` header sent with every request
    ///
    /// # Errors
    ///
    /// Returns [`RpError::Http`] if the TLS backend cannot be initialised.
    pub fn with_settings(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(RpError::Http)?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send_token_request(
        &self,
        registration: &ClientRegistration,
        request: TokenRequest,
    ) -> Result<TokenResponse> {
        let mut form: Vec<(String, String)> = request
            .parameters
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();

        let mut builder = self
            .client
            .post(request.endpoint.clone())
            .header(ACCEPT, "application/json");

        match request.authentication_method {
            ClientAuthenticationMethod::ClientSecretBasic => {
                let secret = client_secret(registration, request.authentication_method)?;
                builder = builder.basic_auth(form_encode(&registration.client_id), Some(form_encode(secret)));
            }
            ClientAuthenticationMethod::ClientSecretPost => {
                let secret = client_secret(registration, request.authentication_method)?;
                form.push((parameters::CLIENT_ID.to_string(), registration.client_id.clone()));
                form.push((parameters::CLIENT_SECRET.to_string(), secret.to_string()));
            }
            ClientAuthenticationMethod::None => {
                form.push((parameters::CLIENT_ID.to_string(), registration.client_id.clone()));
            }
        }

        tracing::debug!(
            endpoint = %request.endpoint,
            authentication_method = %request.authentication_method,
            "Sending token request"
        );

        let response = builder.form(&form).send().await.map_err(|e| {
            RpError::Transport(format!("token request to {} failed: {e}", request.endpoint))
        })?;
        let status = response.status();
        let body = response.text().await.map_err(|e| {
            RpError::Transport(format!("failed to read token response: {e}"))
        })?;

        let parameters = match parse_object(&body) {
            Some(parameters) => parameters,
            None => {
                return Err(RpError::Transport(format!(
                    "token endpoint returned {status} with a non-JSON body"
                ))
                .into())
            }
        };

        if !status.is_success() && parameters.error().is_none() {
            return Err(RpError::Transport(format!(
                "token endpoint returned {status} without an OAuth error"
            ))
            .into());
        }

        Ok(TokenResponse { parameters })
    }

    async fn send_userinfo_request(
        &self,
        _registration: &ClientRegistration,
        request: UserinfoRequest,
    ) -> Result<UserinfoResponse> {
        tracing::debug!(endpoint = %request.endpoint, "Sending userinfo request");

        let response = self
            .client
            .get(request.endpoint.clone())
            .bearer_auth(&request.access_token)
            .header(ACCEPT, "application/json, application/jwt")
            .send()
            .await
            .map_err(|e| {
                RpError::Transport(format!("userinfo request to {} failed: {e}", request.endpoint))
            })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .map(|value| value.trim().to_ascii_lowercase());
        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(|e| {
            RpError::Transport(format!("failed to read userinfo response: {e}"))
        })?;

        if !status.is_success() {
            return userinfo_error(status, challenge.as_deref(), &body);
        }

        if content_type.as_deref() == Some(JWT_CONTENT_TYPE) {
            return Ok(UserinfoResponse {
                token: Some(body.trim().to_string()),
                ..UserinfoResponse::default()
            });
        }

        let parameters = parse_object(&body).ok_or_else(|| {
            RpError::Transport("userinfo endpoint returned a non-JSON body".to_string())
        })?;
        let principal = Principal::from_claims(parameters.as_map().clone()).with_kind(TokenKind::UserinfoToken);

        Ok(UserinfoResponse {
            parameters,
            principal: Some(principal),
            token: None,
        })
    }
}

fn client_secret(registration: &ClientRegistration, method: ClientAuthenticationMethod) -> Result<&str> {
    registration.client_secret.as_deref().ok_or_else(|| {
        RpError::Config(format!(
            "{method} requires a client secret for {}",
            registration.issuer
        ))
        .into()
    })
}

fn form_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn parse_object(body: &str) -> Option<ResponseParameters> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Some(ResponseParameters::new(map)),
        _ => None,
    }
}

fn userinfo_error(status: StatusCode, challenge: Option<&str>, body: &str) -> Result<UserinfoResponse> {
    let parameters = parse_object(body)
        .filter(|parameters| parameters.error().is_some())
        .or_else(|| challenge.and_then(parse_bearer_challenge));

    match parameters {
        Some(parameters) => Ok(UserinfoResponse {
            parameters,
            ..UserinfoResponse::default()
        }),
        None => Err(RpError::Transport(format!(
            "userinfo endpoint returned {status} without an OAuth error"
        ))
        .into()),
    }
}

/// Reads the error attributes of a `WWW-Authenticate: Bearer ...` header.
///
/// Returns `None` unless the challenge carries an `error` attribute.
fn parse_bearer_challenge(www_authenticate: &str) -> Option<ResponseParameters> {
    let mut attributes = Map::new();
    for name in [parameters::ERROR, parameters::ERROR_DESCRIPTION, parameters::ERROR_URI] {
        if let Some(value) = bearer_attribute(www_authenticate, name) {
            attributes.insert(name.to_string(), Value::String(value));
        }
    }
    let attributes = ResponseParameters::new(attributes);
    attributes.error().map(|_| attributes)
}

fn bearer_attribute(www_authenticate: &str, name: &str) -> Option<String> {
    let key = format!("{name}=");
    let pos = www_authenticate.match_indices(&key).find_map(|(pos, _)| {
        let boundary = www_authenticate[..pos]
            .chars()
            .next_back()
            .map(|c| c.is_whitespace() || c == ',')
            .unwrap_or(true);
        boundary.then_some(pos)
    })?;
    let rest = &www_authenticate[pos + key.len()..];

    if let Some(inner) = rest.strip_prefix('"') {
        let end = inner.find('"')?;
        Some(inner[..end].to_string())
    } else {
        let end = rest
            .find(|c: char| c.is_whitespace() || c == ',')
            .unwrap_or(rest.len());
        Some(rest[..end].to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bearer_challenge_quoted_attributes() {
        let parameters = parse_bearer_challenge(
            r#"Bearer realm="example", error="invalid_token", error_description="The access token expired""#,
        )
        .unwrap();
        let rejection = parameters.error().unwrap();
        assert_eq!(rejection.error, "invalid_token");
        assert_eq!(rejection.description.as_deref(), Some("The access token expired"));
    }

    #[test]
    fn test_parse_bearer_challenge_unquoted_attribute() {
        let parameters = parse_bearer_challenge("Bearer error=insufficient_scope, scope=openid").unwrap();
        assert_eq!(parameters.get_str("error"), Some("insufficient_scope"));
    }

    #[test]
    fn test_parse_bearer_challenge_without_error() {
        assert!(parse_bearer_challenge(r#"Bearer realm="example""#).is_none());
    }

    #[test]
    fn test_bearer_attribute_requires_boundary() {
        assert_eq!(
            bearer_attribute(r#"Bearer xerror="no", error="yes""#, "error").as_deref(),
            Some("yes")
        );
    }

    #[test]
    fn test_form_encode_escapes_reserved_characters() {
        assert_eq!(form_encode("a b:c"), "a+b%3Ac");
    }

    #[test]
    fn test_with_settings_builds_client() {
        assert!(HttpTransport::with_settings(Duration::from_secs(5), "rpflow-test").is_ok());
    }
}
