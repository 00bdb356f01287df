//! Command-line interface definition for oidc-rp
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands to run the reference host and to inspect the
//! URLs and configuration the relying party would use.

use clap::{Parser, Subcommand};

/// oidc-rp - OpenID Connect relying party
///
/// Runs the login, callback and logout endpoints of an OIDC Authorization
/// Code flow client, or prints the URLs it would redirect to.
#[derive(Parser, Debug, Clone)]
#[command(name = "oidc-rp")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "OIDC_RP_CONFIG", default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for oidc-rp
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the reference HTTP host
    Serve {
        /// Listen address, overriding the configuration
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Print a fresh authorization URL and its correlation values
    AuthorizeUrl {
        /// API audience for the access token
        #[arg(short, long)]
        audience: Option<String>,
    },

    /// Print the provider logout URL
    LogoutUrl {
        /// Where the provider should send the browser afterwards
        #[arg(short, long)]
        return_to: Option<String>,

        /// Host used to resolve a relative return URL
        #[arg(long, default_value = "localhost:3000")]
        host: String,

        /// Scheme used to resolve a relative return URL
        #[arg(long, default_value = "https")]
        scheme: String,
    },

    /// Validate the configuration and print it with secrets masked
    CheckConfig,
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Configuration file path, falling back to the default location.
    pub fn config_path(&self) -> &str {
        self.config.as_deref().unwrap_or("config/config.yaml")
    }
}
