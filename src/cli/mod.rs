//! CLI entry point for kc-session.

pub mod auth;
pub mod flow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Keycloak session CLI
#[derive(Parser, Debug)]
#[command(name = "kc-session", version, about = "Keycloak session manager CLI")]
pub struct Cli {
    /// TOML config file; `KEYCLOAK_*` environment variables are used when omitted
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show session status
    Status,
    /// Print the access token's claims
    Claims,
    /// Log in through the browser
    Login,
    /// Refresh the token set now
    Refresh,
    /// End the session
    Logout(LogoutArgs),
    /// Print the userinfo document
    Userinfo,
}

/// Arguments for `kc-session logout`.
#[derive(Parser, Debug)]
pub struct LogoutArgs {
    /// Also revoke the tokens at the identity provider
    #[arg(long)]
    pub everywhere: bool,
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
