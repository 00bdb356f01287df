//! Configuration loading tests: YAML file, environment overrides and CLI
//! overrides, applied in that order.

mod common;

use clap::Parser;
use serial_test::serial;

use common::temp_config_file;
use oidc_rp::cli::Cli;
use oidc_rp::config::Config;

const CONFIG_YAML: &str = r#"
client:
  issuer: tenant.example.com
  client_id: file-client
  client_secret: file-secret
  redirect_uri: https://app.example.com/callback
  scopes: [openid, profile, email]
  clock_skew_seconds: 60
server:
  bind: 127.0.0.1:4000
  cookie_name: app_session
"#;

const ENV_VARS: &[&str] = &[
    "OIDC_RP_ISSUER",
    "OIDC_RP_CLIENT_ID",
    "OIDC_RP_CLIENT_SECRET",
    "OIDC_RP_REDIRECT_URI",
    "OIDC_RP_POST_LOGOUT_REDIRECT_URI",
    "OIDC_RP_AUDIENCE",
    "OIDC_RP_SCOPES",
    "OIDC_RP_CLOCK_SKEW_SECONDS",
    "OIDC_RP_BIND",
];

fn clear_env() {
    for var in ENV_VARS {
        std::env::remove_var(var);
    }
}

fn cli(args: &[&str]) -> Cli {
    Cli::try_parse_from(args).expect("valid arguments")
}

#[test]
#[serial]
fn test_load_from_file() {
    clear_env();
    let (_dir, path) = temp_config_file(CONFIG_YAML);
    let path = path.to_str().unwrap();

    let config = Config::load(path, &cli(&["oidc-rp", "check-config"])).unwrap();

    assert_eq!(config.client.client_id, "file-client");
    assert_eq!(config.client.normalized_issuer(), "https://tenant.example.com/");
    assert_eq!(config.client.scope_string(), "openid profile email");
    assert_eq!(config.client.clock_skew_seconds, 60);
    assert_eq!(config.server.bind, "127.0.0.1:4000");
    assert_eq!(config.server.cookie_name, "app_session");
    // Unset fields keep their defaults.
    assert_eq!(config.client.name_claim, "name");
    assert!(config.client.use_pkce);
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_missing_file_falls_back_to_defaults() {
    clear_env();
    let config = Config::load(
        "/nonexistent/oidc-rp/config.yaml",
        &cli(&["oidc-rp", "check-config"]),
    )
    .unwrap();

    assert!(config.client.issuer.is_empty());
    assert!(config.validate().is_err());
}

#[test]
#[serial]
fn test_malformed_file_is_an_error() {
    clear_env();
    let (_dir, path) = temp_config_file("client: [not, a, map");
    let result = Config::load(path.to_str().unwrap(), &cli(&["oidc-rp", "check-config"]));
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_env_overrides_file() {
    clear_env();
    let (_dir, path) = temp_config_file(CONFIG_YAML);
    std::env::set_var("OIDC_RP_CLIENT_ID", "env-client");
    std::env::set_var("OIDC_RP_AUDIENCE", "https://api.example.com");
    std::env::set_var("OIDC_RP_SCOPES", "openid,offline_access email");
    std::env::set_var("OIDC_RP_CLOCK_SKEW_SECONDS", "120");

    let config = Config::load(path.to_str().unwrap(), &cli(&["oidc-rp", "check-config"])).unwrap();
    clear_env();

    assert_eq!(config.client.client_id, "env-client");
    assert_eq!(
        config.client.audience.as_deref(),
        Some("https://api.example.com")
    );
    assert_eq!(config.client.scope_string(), "openid offline_access email");
    assert_eq!(config.client.clock_skew_seconds, 120);
}

#[test]
#[serial]
fn test_invalid_env_number_is_ignored() {
    clear_env();
    let (_dir, path) = temp_config_file(CONFIG_YAML);
    std::env::set_var("OIDC_RP_CLOCK_SKEW_SECONDS", "soon");

    let config = Config::load(path.to_str().unwrap(), &cli(&["oidc-rp", "check-config"])).unwrap();
    clear_env();

    assert_eq!(config.client.clock_skew_seconds, 60);
}

#[test]
#[serial]
fn test_cli_bind_overrides_env_and_file() {
    clear_env();
    let (_dir, path) = temp_config_file(CONFIG_YAML);
    std::env::set_var("OIDC_RP_BIND", "127.0.0.1:5000");

    let config = Config::load(
        path.to_str().unwrap(),
        &cli(&["oidc-rp", "serve", "--bind", "0.0.0.0:8080"]),
    )
    .unwrap();
    clear_env();

    assert_eq!(config.server.bind, "0.0.0.0:8080");
}

#[test]
#[serial]
fn test_excessive_clock_skew_fails_validation() {
    clear_env();
    let (_dir, path) = temp_config_file(CONFIG_YAML);
    std::env::set_var("OIDC_RP_CLOCK_SKEW_SECONDS", "301");

    let config = Config::load(path.to_str().unwrap(), &cli(&["oidc-rp", "check-config"])).unwrap();
    clear_env();

    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("clock_skew_seconds"));
}

#[test]
#[serial]
fn test_redacted_masks_secret() {
    clear_env();
    let (_dir, path) = temp_config_file(CONFIG_YAML);
    let config = Config::load(path.to_str().unwrap(), &cli(&["oidc-rp", "check-config"])).unwrap();

    let redacted = config.redacted();
    assert_eq!(redacted.client.client_secret.as_deref(), Some("********"));
    assert_eq!(config.client.client_secret.as_deref(), Some("file-secret"));
}
