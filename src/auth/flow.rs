//! Authorization-request collaborator: building the request, prompting the
//! user, and the shape of the redirect outcome.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Url;
use strum::IntoStaticStr;

use super::discovery::DiscoveryDocument;
use super::error::AuthError;

/// Inputs for constructing an authorization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequestParams {
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub use_pkce: bool,
    pub extra_params: BTreeMap<String, String>,
}

/// A constructed authorization request, ready to be prompted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    pub url: String,
    pub state: String,
    pub redirect_uri: String,
    /// Present when the request carries a PKCE challenge.
    pub code_verifier: Option<String>,
}

/// Terminal outcome of an authorization prompt.
#[derive(Debug, Clone, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum AuthResponse {
    Success {
        code: String,
        state: Option<String>,
    },
    Error {
        error: String,
        description: Option<String>,
    },
    Cancel,
    Dismiss,
}

impl AuthResponse {
    /// Short label for logging (`success`, `error`, `cancel`, `dismiss`).
    pub fn kind(&self) -> &'static str {
        self.into()
    }

    /// Parse a redirect target (full URL or bare query string).
    ///
    /// `error` wins over `code`; neither present reads as a dismissal.
    pub fn from_redirect(redirect: &str) -> Self {
        let redirect = redirect.trim();
        let query = match Url::parse(redirect) {
            Ok(url) => url.query().unwrap_or_default().to_string(),
            Err(_) => redirect.trim_start_matches('?').to_string(),
        };
        let mut params: BTreeMap<String, String> = BTreeMap::new();
        if let Ok(url) = Url::parse(&format!("http://localhost/?{query}")) {
            for (key, value) in url.query_pairs() {
                params.entry(key.into_owned()).or_insert(value.into_owned());
            }
        }

        if let Some(error) = params.remove("error") {
            return Self::Error {
                error,
                description: params.remove("error_description"),
            };
        }
        match params.remove("code") {
            Some(code) if !code.is_empty() => Self::Success {
                code,
                state: params.remove("state"),
            },
            _ => Self::Dismiss,
        }
    }
}

/// External authorization flow (system browser, webview, console...).
#[async_trait]
pub trait AuthorizationFlow: Send + Sync {
    /// Build the request. Flows that support PKCE generate the verifier here.
    async fn create_request(
        &self,
        params: &AuthRequestParams,
        discovery: &DiscoveryDocument,
    ) -> Result<AuthRequest, AuthError>;

    /// Present the request and wait for its terminal outcome.
    async fn prompt(&self, request: &AuthRequest) -> AuthResponse;
}

/// Build the authorize URL for `params`.
///
/// `code_challenge` is an S256 challenge computed by the flow.
pub fn authorize_url(
    discovery: &DiscoveryDocument,
    params: &AuthRequestParams,
    state: &str,
    code_challenge: Option<&str>,
) -> Result<String, AuthError> {
    let endpoint = discovery.authorization_endpoint()?;
    let mut url = Url::parse(endpoint)
        .map_err(|e| AuthError::InvalidResponse(format!("authorization endpoint {endpoint}: {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", &params.client_id)
            .append_pair("redirect_uri", &params.redirect_uri)
            .append_pair("scope", &params.scopes.join(" "))
            .append_pair("state", state);
        if let Some(challenge) = code_challenge {
            query
                .append_pair("code_challenge", challenge)
                .append_pair("code_challenge_method", "S256");
        }
        for (key, value) in &params.extra_params {
            query.append_pair(key, value);
        }
    }
    Ok(url.into())
}
