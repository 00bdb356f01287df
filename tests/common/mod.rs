//! Shared fixtures for integration tests: a wiremock identity provider and
//! an RS256 signer for ID tokens.

#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use oidc_rp::config::ClientConfig;

pub const SIGNING_KEY: &str = include_str!("../fixtures/signing_key.pem");
pub const ROTATED_SIGNING_KEY: &str = include_str!("../fixtures/rotated_signing_key.pem");
pub const JWKS: &str = include_str!("../fixtures/jwks.json");
pub const JWKS_ROTATED: &str = include_str!("../fixtures/jwks_rotated.json");

pub const CLIENT_ID: &str = "test-client";
pub const CLIENT_SECRET: &str = "test-secret";

pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// Issuer the mock provider stands for.
pub fn issuer(server: &MockServer) -> String {
    format!("{}/", server.uri())
}

/// Client configuration pointing every endpoint at `server`.
pub fn client_config(server: &MockServer) -> ClientConfig {
    let mut config = ClientConfig::new(
        issuer(server),
        CLIENT_ID,
        "https://app.example.com/callback",
    );
    config.client_secret = Some(CLIENT_SECRET.to_string());
    config
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Claims of a valid ID token for `sub` with the given nonce and expiry.
pub fn id_token_claims(server: &MockServer, nonce: &str, exp: i64) -> Value {
    json!({
        "iss": issuer(server),
        "sub": "auth0|user-1",
        "aud": CLIENT_ID,
        "exp": exp,
        "iat": exp - 3600,
        "nonce": nonce,
        "name": "Ada Lovelace",
        "email": "ada@example.com",
    })
}

/// Signs `claims` as an RS256 JWT with the given key and `kid`.
pub fn sign(claims: &Value, kid: &str, pem: &str) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    let key = EncodingKey::from_rsa_pem(pem.as_bytes()).expect("test key must parse");
    encode(&header, claims, &key).expect("signing must succeed")
}

/// Signs `claims` with the primary test key.
pub fn sign_primary(claims: &Value) -> String {
    sign(claims, "test-key-1", SIGNING_KEY)
}

/// Mounts discovery and JWKS endpoints serving the primary key.
pub async fn mount_provider(server: &MockServer) {
    mount_discovery(server).await;
    Mock::given(method("GET"))
        .and(path("/.well-known/jwks.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(JWKS))
        .mount(server)
        .await;
}

/// Mounts only the discovery document.
pub async fn mount_discovery(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": issuer(server),
            "authorization_endpoint": format!("{}/authorize", server.uri()),
            "token_endpoint": format!("{}/oauth/token", server.uri()),
            "jwks_uri": format!("{}/.well-known/jwks.json", server.uri()),
            "code_challenge_methods_supported": ["S256"],
        })))
        .mount(server)
        .await;
}

/// Token endpoint response carrying `id_token`.
pub fn token_body(id_token: &str) -> Value {
    json!({
        "access_token": "access-token-1",
        "token_type": "Bearer",
        "expires_in": 3600,
        "refresh_token": "refresh-token-1",
        "id_token": id_token,
        "scope": "openid profile",
    })
}

/// Mounts a token endpoint answering every request with `id_token`.
pub async fn mount_token_endpoint(server: &MockServer, id_token: &str) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(id_token)))
        .mount(server)
        .await;
}

/// Query parameter `name` of `url`.
pub fn query_param(url: &str, name: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}
