//! CLI for the satchel session client.
//!
//! Provides subcommands against the configured school-management backend:
//! - `login` - Resolve credentials into a persisted session
//! - `logout` - Clear the persisted session
//! - `whoami` - Show the persisted profile
//! - `status` - Show whether the session is active, pending, or absent
//! - `config check` - Validate configuration file

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::auth::{Credentials, Role};
use crate::config::Config;
use crate::ClientContext;

/// CLI arguments structure
#[derive(Parser, Debug)]
#[command(name = "satchel")]
#[command(author, version, about = "Multi-role session client for school-management backends", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "satchel.toml")]
    pub config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Log in by probing each role endpoint with the given credentials
    Login {
        /// Account email (must use a recognized email provider)
        #[arg(long)]
        email: String,

        /// Account password (can also be set via SATCHEL_PASSWORD)
        #[arg(long, env = "SATCHEL_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Clear the persisted session
    Logout,

    /// Show the currently persisted profile
    Whoami,

    /// Show session status (active, pending verification, or logged out)
    Status,

    /// Configuration management commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate configuration file
    Check,
}

/// Dispatch a parsed subcommand against the client context.
pub async fn execute(command: Commands, context: &ClientContext) -> Result<()> {
    match command {
        Commands::Login { email, password } => login(context, email, password).await,
        Commands::Logout => logout(context).await,
        Commands::Whoami => whoami(context).await,
        Commands::Status => status(context).await,
        Commands::Config(ConfigCommands::Check) => check_config(&context.config),
    }
}

async fn login(context: &ClientContext, email: String, password: String) -> Result<()> {
    let credentials = Credentials { email, password };
    let outcome = context.resolver.resolve(&credentials).await?;

    if outcome.active {
        println!("Logged in as {} ({})", credentials.email, outcome.role);
    } else {
        println!(
            "Logged in as {} ({}); access is restricted until an administrator verifies the account",
            credentials.email, outcome.role
        );
    }
    Ok(())
}

async fn logout(context: &ClientContext) -> Result<()> {
    context.resolver.logout().await?;
    println!("Logged out");
    Ok(())
}

async fn whoami(context: &ClientContext) -> Result<()> {
    match context.resolver.current().await? {
        Some(session) => {
            println!("{} <{}>", session.profile.name, session.profile.email);
            println!("Role: {}", session.role);
            if let Some(class) = &session.profile.assigned_class {
                println!("Class: {}", class);
            }
            if let Some(subject) = &session.profile.subject {
                println!("Subject: {}", subject);
            }
        }
        None => println!("Not logged in"),
    }
    Ok(())
}

async fn status(context: &ClientContext) -> Result<()> {
    match context.resolver.current().await? {
        Some(session) => {
            let active = session.role == Role::Admin || session.profile.is_verified();
            if active {
                println!("Session active ({})", session.role);
            } else {
                println!("Session pending verification ({})", session.role);
            }
        }
        None => println!("Logged out"),
    }
    Ok(())
}

fn check_config(config: &Config) -> Result<()> {
    if config.auth.allowed_email_domains.is_empty() {
        bail!("auth.allowed_email_domains must not be empty; every login would be rejected");
    }

    let url = reqwest::Url::parse(&config.backend.base_url)
        .map_err(|e| anyhow::anyhow!("backend.base_url is not a valid URL: {}", e))?;
    if url.cannot_be_a_base() {
        bail!("backend.base_url cannot be used as a base URL");
    }

    if config.backend.timeout_secs == 0 {
        bail!("backend.timeout_secs must be at least 1");
    }

    println!("Configuration OK");
    println!("  backend: {}", config.backend.base_url);
    println!(
        "  accepted providers: {}",
        config.auth.allowed_email_domains.join(", ")
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn default_config_passes_check() {
        assert!(check_config(&Config::default()).is_ok());
    }

    #[test]
    fn empty_allow_list_fails_check() {
        let mut config = Config::default();
        config.auth.allowed_email_domains.clear();
        assert!(check_config(&config).is_err());
    }

    #[test]
    fn invalid_base_url_fails_check() {
        let mut config = Config::default();
        config.backend.base_url = "not a url".to_string();
        assert!(check_config(&config).is_err());
    }

    #[test]
    fn zero_timeout_fails_check() {
        let mut config = Config::default();
        config.backend.timeout_secs = 0;
        assert!(check_config(&config).is_err());
    }
}
