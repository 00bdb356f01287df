//! Binary smoke tests using assert_cmd

mod common;

use assert_cmd::Command;
use predicates::prelude::*;

use common::temp_config_file;

const CONFIG_YAML: &str = r#"
client:
  issuer: tenant.example.com
  client_id: cli-client
  client_secret: super-secret-value
  redirect_uri: https://app.example.com/callback
"#;

fn oidc_rp() -> Command {
    let mut cmd = Command::cargo_bin("oidc-rp").unwrap();
    for var in [
        "OIDC_RP_CONFIG",
        "OIDC_RP_ISSUER",
        "OIDC_RP_CLIENT_ID",
        "OIDC_RP_CLIENT_SECRET",
        "OIDC_RP_REDIRECT_URI",
        "OIDC_RP_AUDIENCE",
        "OIDC_RP_SCOPES",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_help_lists_commands() {
    oidc_rp()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("authorize-url"))
        .stdout(predicate::str::contains("logout-url"))
        .stdout(predicate::str::contains("check-config"));
}

#[test]
fn test_check_config_masks_secret() {
    let (_dir, path) = temp_config_file(CONFIG_YAML);

    oidc_rp()
        .args(["--config", path.to_str().unwrap(), "check-config"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("https://tenant.example.com/authorize"))
        .stdout(predicate::str::contains("super-secret-value").not());
}

#[test]
fn test_check_config_rejects_incomplete_config() {
    let (_dir, path) = temp_config_file("client:\n  issuer: tenant.example.com\n");

    oidc_rp()
        .args(["--config", path.to_str().unwrap(), "check-config"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("client_id"));
}

#[test]
fn test_authorize_url_prints_correlation_values() {
    let (_dir, path) = temp_config_file(CONFIG_YAML);

    oidc_rp()
        .args(["--config", path.to_str().unwrap(), "authorize-url"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with(
            "https://tenant.example.com/authorize?client_id=cli-client",
        ))
        .stdout(predicate::str::contains("code_challenge_method=S256"))
        .stdout(predicate::str::contains("state:"))
        .stdout(predicate::str::contains("code_verifier:"));
}

#[test]
fn test_logout_url_resolves_relative_return() {
    let (_dir, path) = temp_config_file(CONFIG_YAML);

    oidc_rp()
        .args([
            "--config",
            path.to_str().unwrap(),
            "logout-url",
            "--return-to",
            "/goodbye",
            "--host",
            "app.example.com",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "https://tenant.example.com/v2/logout?client_id=cli-client&returnTo=https%3A%2F%2Fapp.example.com%2Fgoodbye",
        ));
}
