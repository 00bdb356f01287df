//! ID token validation integration tests
//!
//! Tokens are signed with the RSA fixtures in `tests/fixtures/` and the
//! provider's discovery and JWKS endpoints are served by wiremock.

mod common;

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::*;
use oidc_rp::config::ClientConfig;
use oidc_rp::error::RpError;
use oidc_rp::oidc::jwks::JwksCache;
use oidc_rp::oidc::validator::TokenValidator;
use oidc_rp::session::principal::ClaimKey;

fn validator_for(config: ClientConfig) -> TokenValidator {
    let config = Arc::new(config);
    let jwks = Arc::new(JwksCache::new(reqwest::Client::new(), Arc::clone(&config)));
    TokenValidator::new(config, jwks).expect("validator")
}

async fn provider() -> MockServer {
    let server = MockServer::start().await;
    mount_provider(&server).await;
    server
}

// ---------------------------------------------------------------------------
// Accepted tokens
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_valid_token_maps_to_principal() {
    let server = provider().await;
    let validator = validator_for(client_config(&server));
    let token = sign_primary(&id_token_claims(&server, "n-1", now() + 600));

    let principal = validator.validate(&token, "n-1").await.unwrap();

    assert_eq!(principal.get(ClaimKey::Subject), Some("auth0|user-1"));
    assert_eq!(principal.get(ClaimKey::Name), Some("Ada Lovelace"));
    assert_eq!(
        principal.claim("email").and_then(|v| v.as_str()),
        Some("ada@example.com")
    );
}

#[tokio::test]
async fn test_name_claim_is_configurable() {
    let server = provider().await;
    let mut config = client_config(&server);
    config.name_claim = "email".to_string();
    let validator = validator_for(config);
    let token = sign_primary(&id_token_claims(&server, "n", now() + 600));

    let principal = validator.validate(&token, "n").await.unwrap();
    assert_eq!(principal.get(ClaimKey::Name), Some("ada@example.com"));
}

#[tokio::test]
async fn test_audience_array_containing_client_is_accepted() {
    let server = provider().await;
    let validator = validator_for(client_config(&server));
    let mut claims = id_token_claims(&server, "n", now() + 600);
    claims["aud"] = json!([CLIENT_ID, "https://api.example.com"]);
    claims["azp"] = json!(CLIENT_ID);

    assert!(validator.validate(&sign_primary(&claims), "n").await.is_ok());
}

// ---------------------------------------------------------------------------
// Expiry boundary
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_expiry_boundary_respects_clock_skew() {
    let server = provider().await;
    let validator = validator_for(client_config(&server));
    let exp = now();
    let token = sign_primary(&id_token_claims(&server, "n", exp));
    let skew = 300;

    // One second inside the skew window.
    assert!(validator
        .validate_at(&token, "n", exp + skew - 1)
        .await
        .is_ok());

    // Exactly at and one second past the window.
    for at in [exp + skew, exp + skew + 1] {
        let err = validator.validate_at(&token, "n", at).await.unwrap_err();
        assert!(
            matches!(err, RpError::ExpiredToken { expired_at, now } if expired_at == exp && now == at),
            "unexpected error at {at}: {err:?}"
        );
    }
}

#[tokio::test]
async fn test_zero_skew_rejects_token_at_expiry() {
    let server = provider().await;
    let mut config = client_config(&server);
    config.clock_skew_seconds = 0;
    let validator = validator_for(config);
    let exp = now() + 100;
    let token = sign_primary(&id_token_claims(&server, "n", exp));

    assert!(validator.validate_at(&token, "n", exp - 1).await.is_ok());
    assert!(matches!(
        validator.validate_at(&token, "n", exp).await,
        Err(RpError::ExpiredToken { .. })
    ));
}

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_issuer_mismatch() {
    let server = provider().await;
    let validator = validator_for(client_config(&server));
    let mut claims = id_token_claims(&server, "n", now() + 600);
    claims["iss"] = json!("https://evil.example.com/");

    let err = validator
        .validate(&sign_primary(&claims), "n")
        .await
        .unwrap_err();
    match err {
        RpError::IssuerMismatch { expected, actual } => {
            assert_eq!(expected, issuer(&server));
            assert_eq!(actual, "https://evil.example.com/");
        }
        other => panic!("expected IssuerMismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn test_audience_mismatch() {
    let server = provider().await;
    let validator = validator_for(client_config(&server));
    let mut claims = id_token_claims(&server, "n", now() + 600);
    claims["aud"] = json!("some-other-client");

    let err = validator
        .validate(&sign_primary(&claims), "n")
        .await
        .unwrap_err();
    assert!(matches!(err, RpError::AudienceMismatch { ref client_id } if client_id == CLIENT_ID));
}

#[tokio::test]
async fn test_authorized_party_mismatch() {
    let server = provider().await;
    let validator = validator_for(client_config(&server));
    let mut claims = id_token_claims(&server, "n", now() + 600);
    claims["aud"] = json!([CLIENT_ID, "other-client"]);
    claims["azp"] = json!("other-client");

    let err = validator
        .validate(&sign_primary(&claims), "n")
        .await
        .unwrap_err();
    assert!(matches!(err, RpError::AudienceMismatch { .. }));
}

#[tokio::test]
async fn test_nonce_mismatch() {
    let server = provider().await;
    let validator = validator_for(client_config(&server));
    let token = sign_primary(&id_token_claims(&server, "issued-nonce", now() + 600));

    let err = validator.validate(&token, "other-nonce").await.unwrap_err();
    assert!(matches!(err, RpError::NonceMismatch));
}

#[tokio::test]
async fn test_missing_nonce_is_mismatch() {
    let server = provider().await;
    let validator = validator_for(client_config(&server));
    let mut claims = id_token_claims(&server, "n", now() + 600);
    claims.as_object_mut().unwrap().remove("nonce");

    let err = validator
        .validate(&sign_primary(&claims), "n")
        .await
        .unwrap_err();
    assert!(matches!(err, RpError::NonceMismatch));
}

#[tokio::test]
async fn test_signature_from_wrong_key_is_rejected() {
    let server = provider().await;
    let validator = validator_for(client_config(&server));
    // Signed with the rotated key but claiming the published kid.
    let token = sign(
        &id_token_claims(&server, "n", now() + 600),
        "test-key-1",
        ROTATED_SIGNING_KEY,
    );

    let err = validator.validate(&token, "n").await.unwrap_err();
    assert!(matches!(err, RpError::InvalidSignature(_)));
}

#[tokio::test]
async fn test_tampered_payload_is_rejected() {
    let server = provider().await;
    let validator = validator_for(client_config(&server));
    let token = sign_primary(&id_token_claims(&server, "n", now() + 600));
    let forged = sign_primary(&json!({"sub": "someone-else"}));

    let parts: Vec<&str> = token.split('.').collect();
    let forged_parts: Vec<&str> = forged.split('.').collect();
    let tampered = format!("{}.{}.{}", parts[0], forged_parts[1], parts[2]);

    let err = validator.validate(&tampered, "n").await.unwrap_err();
    assert!(matches!(err, RpError::InvalidSignature(_)));
}

#[tokio::test]
async fn test_missing_subject_is_rejected() {
    let server = provider().await;
    let validator = validator_for(client_config(&server));
    let mut claims = id_token_claims(&server, "n", now() + 600);
    claims.as_object_mut().unwrap().remove("sub");

    let err = validator
        .validate(&sign_primary(&claims), "n")
        .await
        .unwrap_err();
    assert!(matches!(err, RpError::InvalidSignature(_)));
}

// ---------------------------------------------------------------------------
// Key rotation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_rotated_key_is_picked_up_with_one_refresh() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("GET"))
        .and(path("/.well-known/jwks.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(JWKS))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/.well-known/jwks.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(JWKS_ROTATED))
        .expect(1)
        .mount(&server)
        .await;

    let validator = validator_for(client_config(&server));

    let old = sign_primary(&id_token_claims(&server, "n", now() + 600));
    validator.validate(&old, "n").await.unwrap();

    let rotated = sign(
        &id_token_claims(&server, "n", now() + 600),
        "test-key-2",
        ROTATED_SIGNING_KEY,
    );
    validator.validate(&rotated, "n").await.unwrap();

    // Both keys are now cached; neither token triggers another fetch.
    validator.validate(&old, "n").await.unwrap();
    validator.validate(&rotated, "n").await.unwrap();
    assert_eq!(validator.jwks().generation(), 2);
}

#[tokio::test]
async fn test_unknown_kid_refreshes_exactly_once() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("GET"))
        .and(path("/.well-known/jwks.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(JWKS))
        .expect(1)
        .mount(&server)
        .await;

    let validator = validator_for(client_config(&server));
    let token = sign(
        &id_token_claims(&server, "n", now() + 600),
        "never-published",
        ROTATED_SIGNING_KEY,
    );

    let err = validator.validate(&token, "n").await.unwrap_err();
    assert!(matches!(err, RpError::InvalidSignature(_)));
    assert_eq!(validator.jwks().generation(), 1);
}

#[tokio::test]
async fn test_jwks_location_falls_back_without_discovery() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/jwks.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(JWKS))
        .expect(1)
        .mount(&server)
        .await;

    let validator = validator_for(client_config(&server));
    let token = sign_primary(&id_token_claims(&server, "n", now() + 600));
    assert!(validator.validate(&token, "n").await.is_ok());
}

#[tokio::test]
async fn test_unreachable_jwks_is_discovery_error() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("GET"))
        .and(path("/.well-known/jwks.json"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let validator = validator_for(client_config(&server));
    let token = sign_primary(&id_token_claims(&server, "n", now() + 600));
    let err = validator.validate(&token, "n").await.unwrap_err();
    assert!(matches!(err, RpError::Discovery(_)));
}

#[tokio::test]
async fn test_key_location_recovers_after_discovery_outage() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": issuer(&server),
            "jwks_uri": format!("{}/protocol/openid-connect/certs", server.uri()),
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/protocol/openid-connect/certs"))
        .respond_with(ResponseTemplate::new(200).set_body_string(JWKS))
        .expect(1)
        .mount(&server)
        .await;

    let validator = validator_for(client_config(&server));
    let token = sign_primary(&id_token_claims(&server, "n", now() + 600));

    // Discovery is down and the conventional location has no keys.
    let err = validator.validate(&token, "n").await.unwrap_err();
    assert!(matches!(err, RpError::Discovery(_)));

    // The failed lookup was not remembered.
    validator.validate(&token, "n").await.unwrap();
    validator.validate(&token, "n").await.unwrap();
}
