/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

- `serve`  - Run the reference HTTP host
- `urls`   - Print authorization and logout URLs
- `check`  - Validate and print the effective configuration
*/

use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::oidc::client::{OidcClient, RequestOrigin};

// Reference host
pub mod serve {
    //! Runs the axum host until Ctrl-C.

    use super::*;

    /// Start the reference host
    ///
    /// # Arguments
    ///
    /// * `config` - Loaded configuration (consumed)
    pub async fn run_serve(config: Config) -> Result<()> {
        crate::server::serve(config).await
    }
}

// URL inspection
pub mod urls {
    //! Prints the URLs the relying party would redirect a browser to.
    //!
    //! Nothing is recorded: the printed `state` cannot complete a login
    //! against a running host.

    use super::*;

    /// Print a fresh authorization URL with its correlation values
    pub fn print_authorize_url(config: &Config, audience: Option<&str>) -> Result<()> {
        let client = OidcClient::new(Arc::new(config.client.clone()))?;
        let request = client.build_authorization_request(audience)?;

        println!("{}", request.url);
        println!();
        println!("state:         {}", request.state);
        println!("nonce:         {}", request.nonce);
        if let Some(verifier) = &request.code_verifier {
            println!("code_verifier: {}", verifier);
        }
        Ok(())
    }

    /// Print the provider logout URL
    ///
    /// # Arguments
    ///
    /// * `return_to` - Post-logout target; relative values are resolved
    ///   against `scheme://host` and the configured path base
    pub fn print_logout_url(
        config: &Config,
        return_to: Option<&str>,
        host: &str,
        scheme: &str,
    ) -> Result<()> {
        let client = OidcClient::new(Arc::new(config.client.clone()))?;
        let origin = RequestOrigin::new(scheme, host, config.server.path_base.clone());
        let url = client.build_logout_url(return_to, &origin)?;
        println!("{}", url);
        Ok(())
    }
}

// Configuration check
pub mod check {
    //! Validates the configuration and prints it as YAML.

    use super::*;

    /// Validate and print the configuration with the client secret masked
    pub fn run_check(config: &Config) -> Result<()> {
        config.validate()?;
        let yaml = serde_yaml::to_string(&config.redacted())?;
        println!("{}", yaml);
        println!("Configuration is valid");
        println!("issuer:            {}", config.client.normalized_issuer());
        println!("authorize:         {}", config.client.authorization_endpoint());
        println!("token:             {}", config.client.token_endpoint());
        println!("logout:            {}", config.client.end_session_endpoint());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        let mut config = Config::default();
        config.client.issuer = "tenant.example.com".to_string();
        config.client.client_id = "abc".to_string();
        config.client.redirect_uri = "https://app.example.com/callback".to_string();
        config
    }

    #[test]
    fn test_check_accepts_valid_config() {
        assert!(check::run_check(&config()).is_ok());
    }

    #[test]
    fn test_check_rejects_incomplete_config() {
        assert!(check::run_check(&Config::default()).is_err());
    }

    #[test]
    fn test_urls_commands_succeed() {
        let config = config();
        assert!(urls::print_authorize_url(&config, None).is_ok());
        assert!(urls::print_logout_url(&config, Some("/home"), "app.example.com", "https").is_ok());
    }
}
