//! Client configuration. A [`KeycloakConfig`] is built in code, read from a
//! TOML file, or read from `KEYCLOAK_*` environment variables.

use std::path::Path;

use bon::Builder;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Path appended to the native redirect scheme when no explicit redirect URI is set.
pub const NATIVE_REDIRECT_PATH: &str = "auth";
/// Seconds subtracted from a token's lifetime before its refresh is scheduled.
pub const REFRESH_TIME_BUFFER: u64 = 20;
/// Storage key the token set is persisted under.
pub const TOKEN_STORAGE_KEY: &str = "$KEYCLOAK_AUTH_TOKEN$";
/// Redirect scheme used when `scheme` is not configured.
pub const DEFAULT_SCHEME: &str = "exp";

/// Keycloak client configuration.
///
/// # Example
/// ```
/// use keycloak_session::config::KeycloakConfig;
///
/// let config = KeycloakConfig::builder()
///     .url("https://sso.example.com")
///     .realm("staff")
///     .client_id("mobile-app")
///     .use_pkce(true)
///     .build();
/// assert_eq!(config.refresh_time_buffer, 20);
/// assert_eq!(config.redirect_uri(), "exp://auth");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
pub struct KeycloakConfig {
    /// Base URL of the Keycloak server, e.g. `https://sso.example.com`.
    #[builder(into)]
    pub url: String,
    #[builder(into)]
    pub realm: String,
    #[builder(into)]
    pub client_id: String,
    #[builder(into)]
    pub client_secret: Option<String>,
    #[builder(default)]
    #[serde(default)]
    pub use_pkce: bool,
    #[builder(default)]
    #[serde(default)]
    pub disable_auto_refresh: bool,
    #[builder(into, default = NATIVE_REDIRECT_PATH.to_string())]
    #[serde(default = "default_native_redirect_path")]
    pub native_redirect_path: String,
    /// Refresh safety margin in seconds.
    #[builder(default = REFRESH_TIME_BUFFER)]
    #[serde(default = "default_refresh_time_buffer")]
    pub refresh_time_buffer: u64,
    #[builder(into)]
    pub scheme: Option<String>,
    #[builder(into, default = TOKEN_STORAGE_KEY.to_string())]
    #[serde(default = "default_token_storage_key")]
    pub token_storage_key: String,
    #[builder(default = default_scopes())]
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Overrides the redirect URI derived from `scheme` and `native_redirect_path`.
    #[builder(into)]
    pub redirect_uri: Option<String>,
}

fn default_native_redirect_path() -> String {
    NATIVE_REDIRECT_PATH.to_string()
}

fn default_refresh_time_buffer() -> u64 {
    REFRESH_TIME_BUFFER
}

fn default_token_storage_key() -> String {
    TOKEN_STORAGE_KEY.to_string()
}

fn default_scopes() -> Vec<String> {
    vec!["openid".to_string()]
}

impl KeycloakConfig {
    /// Issuer URL of the realm: `{url}/realms/{realm}`.
    ///
    /// A trailing slash on `url` is tolerated and the realm name is
    /// percent-encoded as a single path segment.
    pub fn realm_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| Error::configuration(format!("invalid Keycloak url {}: {e}", self.url)))?;
        url.path_segments_mut()
            .map_err(|_| Error::configuration(format!("Keycloak url {} cannot be a base", self.url)))?
            .pop_if_empty()
            .push("realms")
            .push(&self.realm);
        Ok(url)
    }

    /// Redirect URI registered for this client.
    pub fn redirect_uri(&self) -> String {
        if let Some(uri) = &self.redirect_uri {
            return uri.clone();
        }
        let scheme = self.scheme.as_deref().unwrap_or(DEFAULT_SCHEME);
        format!(
            "{scheme}://{}",
            self.native_redirect_path.trim_start_matches('/')
        )
    }

    /// Space-delimited scope parameter.
    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Load from `KEYCLOAK_*` environment variables (a `.env` file is honored).
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| Error::configuration(format!("{key} is not set")))
        };

        let refresh_time_buffer = match lookup("KEYCLOAK_REFRESH_TIME_BUFFER") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
                Error::configuration(format!("KEYCLOAK_REFRESH_TIME_BUFFER={raw}: {e}"))
            })?,
            None => REFRESH_TIME_BUFFER,
        };

        let config = Self {
            url: required("KEYCLOAK_URL")?,
            realm: required("KEYCLOAK_REALM")?,
            client_id: required("KEYCLOAK_CLIENT_ID")?,
            client_secret: lookup("KEYCLOAK_CLIENT_SECRET"),
            use_pkce: lookup("KEYCLOAK_USE_PKCE").is_some_and(|v| parse_flag(&v)),
            disable_auto_refresh: lookup("KEYCLOAK_DISABLE_AUTO_REFRESH")
                .is_some_and(|v| parse_flag(&v)),
            native_redirect_path: lookup("KEYCLOAK_NATIVE_REDIRECT_PATH")
                .unwrap_or_else(default_native_redirect_path),
            refresh_time_buffer,
            scheme: lookup("KEYCLOAK_SCHEME"),
            token_storage_key: lookup("KEYCLOAK_TOKEN_STORAGE_KEY")
                .unwrap_or_else(default_token_storage_key),
            scopes: lookup("KEYCLOAK_SCOPES")
                .map(|raw| raw.split_whitespace().map(str::to_string).collect())
                .unwrap_or_else(default_scopes),
            redirect_uri: lookup("KEYCLOAK_REDIRECT_URI"),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(Error::configuration("client_id must not be empty"));
        }
        if self.realm.trim().is_empty() {
            return Err(Error::configuration("realm must not be empty"));
        }
        if self.token_storage_key.is_empty() {
            return Err(Error::configuration("token_storage_key must not be empty"));
        }
        self.realm_url().map(|_| ())
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
