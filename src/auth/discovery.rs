//! OIDC discovery: the endpoints the session talks to.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::AuthError;
use crate::util::timeout::with_timeout;

const WELL_KNOWN_PATH: &str = ".well-known/openid-configuration";
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Endpoints advertised by an issuer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub revocation_endpoint: Option<String>,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
}

impl DiscoveryDocument {
    /// Endpoints Keycloak serves under a realm URL, derived without a network call.
    pub fn keycloak(realm_url: &Url) -> Self {
        let base = realm_url.as_str().trim_end_matches('/');
        let endpoint = |name: &str| Some(format!("{base}/protocol/openid-connect/{name}"));
        Self {
            issuer: Some(base.to_string()),
            authorization_endpoint: endpoint("auth"),
            token_endpoint: endpoint("token"),
            revocation_endpoint: endpoint("revoke"),
            userinfo_endpoint: endpoint("userinfo"),
            end_session_endpoint: endpoint("logout"),
        }
    }

    pub fn token_endpoint(&self) -> Result<&str, AuthError> {
        non_empty(&self.token_endpoint).ok_or(AuthError::MissingEndpoint("token endpoint"))
    }

    pub fn authorization_endpoint(&self) -> Result<&str, AuthError> {
        non_empty(&self.authorization_endpoint)
            .ok_or(AuthError::MissingEndpoint("authorization endpoint"))
    }

    pub fn revocation_endpoint(&self) -> Result<&str, AuthError> {
        non_empty(&self.revocation_endpoint)
            .ok_or(AuthError::MissingEndpoint("revocation endpoint"))
    }

    pub fn userinfo_endpoint(&self) -> Result<&str, AuthError> {
        non_empty(&self.userinfo_endpoint).ok_or(AuthError::MissingEndpoint("userinfo endpoint"))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Resolves an issuer URL to its discovery document.
#[async_trait]
pub trait DiscoveryResolver: Send + Sync {
    async fn resolve(&self, issuer: &Url) -> Result<DiscoveryDocument, AuthError>;
}

/// Fetches `{issuer}/.well-known/openid-configuration`.
#[derive(Debug, Clone)]
pub struct HttpDiscovery {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpDiscovery {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for HttpDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiscoveryResolver for HttpDiscovery {
    async fn resolve(&self, issuer: &Url) -> Result<DiscoveryDocument, AuthError> {
        let url = format!("{}/{WELL_KNOWN_PATH}", issuer.as_str().trim_end_matches('/'));
        debug!(%url, "fetching discovery document");
        with_timeout(self.timeout, async {
            let resp = self.client.get(&url).send().await?;
            if !resp.status().is_success() {
                return Err(AuthError::Rejected {
                    status: resp.status().as_u16(),
                    error: None,
                });
            }
            Ok(resp.json::<DiscoveryDocument>().await?)
        })
        .await
    }
}

/// Returns a fixed document; for offline setups and tests.
#[derive(Debug, Clone)]
pub struct StaticDiscovery(pub DiscoveryDocument);

#[async_trait]
impl DiscoveryResolver for StaticDiscovery {
    async fn resolve(&self, _issuer: &Url) -> Result<DiscoveryDocument, AuthError> {
        Ok(self.0.clone())
    }
}

/// Derives Keycloak's endpoints from the issuer URL itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeycloakDiscovery;

#[async_trait]
impl DiscoveryResolver for KeycloakDiscovery {
    async fn resolve(&self, issuer: &Url) -> Result<DiscoveryDocument, AuthError> {
        Ok(DiscoveryDocument::keycloak(issuer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keycloak_endpoints_hang_off_the_realm() {
        let realm = Url::parse("https://sso.example.com/realms/staff").unwrap();
        let doc = DiscoveryDocument::keycloak(&realm);
        assert_eq!(
            doc.token_endpoint().unwrap(),
            "https://sso.example.com/realms/staff/protocol/openid-connect/token"
        );
        assert_eq!(
            doc.revocation_endpoint().unwrap(),
            "https://sso.example.com/realms/staff/protocol/openid-connect/revoke"
        );
        assert_eq!(
            doc.end_session_endpoint.as_deref(),
            Some("https://sso.example.com/realms/staff/protocol/openid-connect/logout")
        );
    }

    #[test]
    fn missing_or_blank_endpoints_are_reported() {
        let doc = DiscoveryDocument {
            token_endpoint: Some(String::new()),
            ..DiscoveryDocument::default()
        };
        assert_eq!(
            doc.token_endpoint(),
            Err(AuthError::MissingEndpoint("token endpoint"))
        );
        assert!(doc.userinfo_endpoint().is_err());
    }

    #[test]
    fn parses_openid_configuration() {
        let doc: DiscoveryDocument = serde_json::from_str(
            r#"{
                "issuer": "https://sso.example.com/realms/staff",
                "authorization_endpoint": "https://sso.example.com/auth",
                "token_endpoint": "https://sso.example.com/token",
                "grant_types_supported": ["authorization_code"]
            }"#,
        )
        .unwrap();
        assert_eq!(doc.token_endpoint().unwrap(), "https://sso.example.com/token");
        assert!(doc.revocation_endpoint.is_none());
    }
}
