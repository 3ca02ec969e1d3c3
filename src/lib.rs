//! keycloak-session: client-side Keycloak/OIDC session management.
//!
//! Turns a one-shot authorization response into a persisted, automatically
//! refreshed token set, and exposes a stable "logged in, and with what token"
//! view to the rest of an application.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use keycloak_session::auth::{AuthorizationFlow, MemoryStorage, SessionBuilder};
//! use keycloak_session::config::KeycloakConfig;
//!
//! # async fn example(flow: Arc<dyn AuthorizationFlow>) -> keycloak_session::error::Result<()> {
//! let config = KeycloakConfig::from_env()?;
//! let session = SessionBuilder::new(config, Arc::new(MemoryStorage::new()), flow)
//!     .mount()
//!     .await;
//! assert!(session.is_hydrated());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
