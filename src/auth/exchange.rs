//! Code-for-token and refresh-grant exchanges.
//!
//! Both exchanges are stateless: they read their inputs, make one call through
//! the [`TokenTransport`], and hand back a typed result. Committing the result
//! is the session's job.

use tracing::{debug, warn};

use super::discovery::DiscoveryDocument;
use super::error::AuthError;
use super::flow::{AuthRequest, AuthResponse};
use super::token::TokenSet;
use super::transport::{FormParams, TokenTransport};

/// Client-side parameters every token request carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientParams {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub scope: String,
    pub use_pkce: bool,
}

/// Why a refresh did not produce tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    /// The session stays valid; a later attempt may succeed.
    Transient(AuthError),
    /// The grant is gone; the session must be dropped.
    Terminal(AuthError),
}

impl RefreshFailure {
    pub fn from_error(error: AuthError) -> Self {
        if error.is_terminal() {
            Self::Terminal(error)
        } else {
            Self::Transient(error)
        }
    }

    pub fn error(&self) -> &AuthError {
        match self {
            Self::Transient(error) | Self::Terminal(error) => error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

/// Exchange a completed authorization response for a token set.
///
/// Only a `success` response with a usable token endpoint is exchanged; every
/// other outcome is an `Err` carrying the reason. The PKCE verifier is sent as
/// `code_verifier` when `use_pkce` is set and the request has one.
pub async fn exchange_code(
    transport: &dyn TokenTransport,
    response: &AuthResponse,
    request: Option<&AuthRequest>,
    discovery: Option<&DiscoveryDocument>,
    client: &ClientParams,
    now: i64,
) -> Result<TokenSet, AuthError> {
    let code = match response {
        AuthResponse::Success { code, state } => {
            if let (Some(returned), Some(request)) = (state.as_deref(), request) {
                if returned != request.state {
                    return Err(AuthError::StateMismatch);
                }
            }
            code
        }
        AuthResponse::Error { error, description } => {
            return Err(AuthError::AccessDenied {
                error: error.clone(),
                description: description.clone(),
            });
        }
        AuthResponse::Cancel | AuthResponse::Dismiss => return Err(AuthError::Cancelled),
    };
    let endpoint = discovery
        .ok_or(AuthError::MissingEndpoint("token endpoint"))?
        .token_endpoint()?;

    let redirect_uri = request
        .map(|r| r.redirect_uri.as_str())
        .unwrap_or(client.redirect_uri.as_str());
    let mut form = base_form(client, "authorization_code");
    form.push(("code".to_string(), code.clone()));
    form.push(("redirect_uri".to_string(), redirect_uri.to_string()));
    if client.use_pkce {
        match request.and_then(|r| r.code_verifier.as_deref()) {
            Some(verifier) => form.push(("code_verifier".to_string(), verifier.to_string())),
            None => warn!("PKCE enabled but the authorization request has no code verifier"),
        }
    }

    debug!(%endpoint, "exchanging authorization code");
    let response = transport.request_token(endpoint, &form).await?;
    response.into_token_set(now)
}

/// Obtain a new token set with a refresh grant.
pub async fn refresh(
    transport: &dyn TokenTransport,
    refresh_token: &str,
    discovery: Option<&DiscoveryDocument>,
    client: &ClientParams,
    now: i64,
) -> Result<TokenSet, RefreshFailure> {
    if refresh_token.is_empty() {
        return Err(RefreshFailure::Terminal(AuthError::ExpiredOrInvalidGrant));
    }
    let endpoint = discovery
        .ok_or(AuthError::MissingEndpoint("token endpoint"))
        .and_then(|doc| doc.token_endpoint())
        .map_err(RefreshFailure::Transient)?;

    let mut form = base_form(client, "refresh_token");
    form.push(("refresh_token".to_string(), refresh_token.to_string()));

    debug!(%endpoint, "refreshing token set");
    let response = transport
        .request_token(endpoint, &form)
        .await
        .map_err(RefreshFailure::from_error)?;
    response
        .into_token_set(now)
        .map_err(RefreshFailure::Transient)
}

/// Revoke `token` at the revocation endpoint.
pub async fn revoke(
    transport: &dyn TokenTransport,
    token: &str,
    token_type_hint: &str,
    discovery: Option<&DiscoveryDocument>,
    client: &ClientParams,
) -> Result<(), AuthError> {
    let endpoint = discovery
        .ok_or(AuthError::MissingEndpoint("revocation endpoint"))?
        .revocation_endpoint()?;
    let mut form = vec![
        ("token".to_string(), token.to_string()),
        ("token_type_hint".to_string(), token_type_hint.to_string()),
        ("client_id".to_string(), client.client_id.clone()),
    ];
    if let Some(secret) = &client.client_secret {
        form.push(("client_secret".to_string(), secret.clone()));
    }
    transport.revoke(endpoint, &form).await
}

fn base_form(client: &ClientParams, grant_type: &str) -> FormParams {
    let mut form = vec![
        ("grant_type".to_string(), grant_type.to_string()),
        ("client_id".to_string(), client.client_id.clone()),
    ];
    if let Some(secret) = &client.client_secret {
        form.push(("client_secret".to_string(), secret.clone()));
    }
    if !client.scope.is_empty() {
        form.push(("scope".to_string(), client.scope.clone()));
    }
    form
}
