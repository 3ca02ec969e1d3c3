//! CLI command handlers.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::flow::ConsoleFlow;
use crate::auth::{AuthError, AuthResponse, FileStorage, RefreshOutcome, Session, SessionBuilder};
use crate::config::KeycloakConfig;

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Load config, then build and bootstrap a file-backed session.
pub async fn open_session(config_path: Option<&Path>) -> Result<Session, Box<dyn std::error::Error>> {
    let config = match config_path {
        Some(path) => KeycloakConfig::load_from_path(path)?,
        None => KeycloakConfig::from_env()?,
    };
    let session = SessionBuilder::new(
        config,
        Arc::new(FileStorage::new_default()),
        Arc::new(ConsoleFlow),
    )
    .mount()
    .await;
    Ok(session)
}

/// Handle `kc-session status`.
pub async fn handle_status(session: &Session) -> CliResult {
    let config = session.config();
    println!("🔐 Keycloak Session\n");
    println!("  Realm:  {} @ {}", config.realm, config.url);
    println!("  Client: {}", config.client_id);
    println!("  Ready:  {}", if session.is_ready() { "✅" } else { "❌" });

    let tokens = session.tokens();
    if tokens.is_empty() {
        println!("  Status: ❌ Not logged in");
        return Ok(());
    }
    let expires = DateTime::<Utc>::from_timestamp(tokens.expires_at(), 0)
        .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "unknown".to_string());
    println!("  Status: ✅ Logged in (access token expires {expires})");
    if let Some(user) = session.claims().preferred_username() {
        println!("  User:   {user}");
    }
    println!("  Refresh: {}", session.refresh_state());
    Ok(())
}

/// Handle `kc-session claims`.
pub async fn handle_claims(session: &Session) -> CliResult {
    if !session.is_logged_in() {
        return Err(AuthError::NotLoggedIn.into());
    }
    let claims = session.claims();
    if claims.is_empty() {
        println!("⚠️  Access token is not a decodable JWT");
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(claims.as_map())?);
    let roles = claims.realm_roles();
    if !roles.is_empty() {
        println!("\n📌 Realm roles: {}", roles.join(", "));
    }
    Ok(())
}

/// Handle `kc-session login`.
pub async fn handle_login(session: &Session) -> CliResult {
    if !session.is_ready() {
        eprintln!("❌ Session is not ready; check the Keycloak URL and realm");
        std::process::exit(1);
    }
    match session.login().await? {
        AuthResponse::Success { .. } if session.is_logged_in() => {
            let user = session.claims().preferred_username().map(str::to_string);
            match user {
                Some(user) => println!("✅ Logged in as {user}"),
                None => println!("✅ Login successful!"),
            }
        }
        AuthResponse::Success { .. } => {
            eprintln!("❌ Code exchange failed (run with RUST_LOG=debug for details)");
            std::process::exit(1);
        }
        AuthResponse::Error { error, description } => {
            eprintln!("❌ Authorization denied: {error}");
            if let Some(description) = description {
                eprintln!("   {description}");
            }
            std::process::exit(1);
        }
        AuthResponse::Cancel | AuthResponse::Dismiss => {
            println!("⚠️  Login cancelled");
        }
    }
    Ok(())
}

/// Handle `kc-session refresh`.
pub async fn handle_refresh(session: &Session) -> CliResult {
    match session.refresh().await? {
        RefreshOutcome::Refreshed(tokens) => {
            println!("✅ Token set refreshed (valid for {}s)", tokens.expires_in);
        }
        RefreshOutcome::SessionEnded(err) => {
            println!("❌ Session ended: {err}");
        }
        RefreshOutcome::Deferred(err) => {
            println!("⚠️  Refresh failed, session kept: {err}");
        }
        RefreshOutcome::Superseded => {
            println!("⚠️  Refresh result discarded");
        }
    }
    Ok(())
}

/// Handle `kc-session logout [--everywhere]`.
pub async fn handle_logout(session: &Session, everywhere: bool) -> CliResult {
    session.logout(everywhere).await?;
    if everywhere {
        println!("✅ Logged out everywhere");
    } else {
        println!("✅ Logged out");
    }
    Ok(())
}

/// Handle `kc-session userinfo`.
pub async fn handle_userinfo(session: &Session) -> CliResult {
    let info = session.load_user_info().await?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
