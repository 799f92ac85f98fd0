use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use tempfile::TempDir;
use url::Url;
use wiremock::MockServer;

use rpflow::config::Config;

pub const CLIENT_ID: &str = "client-a";
pub const CLIENT_SECRET: &str = "client-secret-with-enough-entropy";
pub const SIGNING_KEY: &str = "0123456789abcdef0123456789abcdef";
pub const REDIRECT_URI: &str = "https://app.example.com/callback";

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("rpflow.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// Issuer served by a mock authorization server.
#[allow(dead_code)]
pub fn issuer(server: &MockServer) -> Url {
    Url::parse(&format!("{}/", server.uri())).expect("mock server uri is a valid url")
}

/// Configuration registering `client-a` with the authorization server at
/// `base`. The server supports the code flow with PKCE and HTTP Basic
/// client authentication; `userinfo` adds a userinfo endpoint.
#[allow(dead_code)]
pub fn config_yaml(base: &str, userinfo: bool) -> String {
    let base = base.trim_end_matches('/');
    let userinfo_endpoint = if userinfo {
        format!("    userinfo_endpoint: {base}/userinfo\n")
    } else {
        String::new()
    };
    format!(
        r#"registrations:
  - issuer: {base}/
    client_id: {CLIENT_ID}
    client_secret: {CLIENT_SECRET}
    redirect_uri: {REDIRECT_URI}
    scopes: [openid, profile]
servers:
  - issuer: {base}/
    authorization_endpoint: {base}/authorize
    token_endpoint: {base}/token
{userinfo_endpoint}    grant_types_supported: [authorization_code]
    response_types_supported: [code]
    response_modes_supported: [query, form_post]
    code_challenge_methods_supported: [S256]
    token_endpoint_auth_methods_supported: [client_secret_basic]
    scopes_supported: [openid, profile]
    id_token_signing_alg_values_supported: [HS256]
state_token:
  signing_key: {SIGNING_KEY}
"#
    )
}

#[allow(dead_code)]
pub fn config(server: &MockServer, userinfo: bool) -> Config {
    let config: Config =
        serde_yaml::from_str(&config_yaml(&server.uri(), userinfo)).expect("valid config yaml");
    config.validate().expect("config validates");
    config
}

/// Claims of an identity token issued by `issuer` to `client-a`.
#[allow(dead_code)]
pub fn identity_claims(issuer: &Url, subject: &str, nonce: &str) -> Value {
    let now = chrono::Utc::now().timestamp();
    json!({
        "iss": issuer.as_str(),
        "sub": subject,
        "aud": CLIENT_ID,
        "iat": now,
        "exp": now + 300,
        "nonce": nonce,
    })
}

/// Signs `claims` with HS256 using the client secret.
#[allow(dead_code)]
pub fn sign_identity_token(claims: &Value) -> String {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(CLIENT_SECRET.as_bytes()),
    )
    .expect("failed to sign identity token")
}

/// Query parameters of an authorization URL.
#[allow(dead_code)]
pub fn query_parameters(url: &str) -> HashMap<String, String> {
    let url = Url::parse(url).expect("authorization url is valid");
    url.query_pairs().into_owned().collect()
}

/// Form-encoded body of a recorded request.
#[allow(dead_code)]
pub fn form_parameters(body: &[u8]) -> HashMap<String, String> {
    url::form_urlencoded::parse(body).into_owned().collect()
}
