//! Token-endpoint transport: the only place the session touches the network
//! for credentials.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::AuthError;
use super::token::TokenSet;
use crate::util::timeout::with_timeout;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// OAuth error codes that mean the grant itself is unusable.
const TERMINAL_ERROR_CODES: &[&str] = &[
    "invalid_grant",
    "invalid_token",
    "unauthorized_client",
    "invalid_client",
];

/// Form-encoded request body.
pub type FormParams = Vec<(String, String)>;

/// Raw token endpoint response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub refresh_expires_in: Option<i64>,
}

impl TokenResponse {
    /// Convert into a [`TokenSet`] minted at `issued_at`.
    ///
    /// Omitted refresh token and scope stay empty so the store's merge keeps
    /// the previous values.
    pub fn into_token_set(self, issued_at: i64) -> Result<TokenSet, AuthError> {
        if self.access_token.is_empty() {
            return Err(AuthError::InvalidResponse(
                "token response has no access_token".to_string(),
            ));
        }
        let expires_in = self.expires_in.filter(|secs| *secs > 0).ok_or_else(|| {
            AuthError::InvalidResponse("token response has no positive expires_in".to_string())
        })?;
        Ok(TokenSet {
            access_token: self.access_token,
            refresh_token: self.refresh_token.unwrap_or_default(),
            token_type: self
                .token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Bearer".to_string()),
            scope: self.scope.unwrap_or_default(),
            issued_at,
            expires_in,
        })
    }
}

/// Calls against the token, revocation and userinfo endpoints.
#[async_trait]
pub trait TokenTransport: Send + Sync {
    async fn request_token(
        &self,
        endpoint: &str,
        form: &FormParams,
    ) -> Result<TokenResponse, AuthError>;

    async fn revoke(&self, endpoint: &str, form: &FormParams) -> Result<(), AuthError>;

    async fn user_info(
        &self,
        endpoint: &str,
        access_token: &str,
    ) -> Result<serde_json::Value, AuthError>;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, AuthError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(classify_rejection(status, extract_error_code(&body)))
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenTransport for HttpTransport {
    async fn request_token(
        &self,
        endpoint: &str,
        form: &FormParams,
    ) -> Result<TokenResponse, AuthError> {
        debug!(%endpoint, "token request");
        with_timeout(self.timeout, async {
            let resp = self
                .client
                .post(endpoint)
                .header("Accept", "application/json")
                .form(form)
                .send()
                .await?;
            let resp = Self::ensure_success(resp).await?;
            Ok(resp.json::<TokenResponse>().await?)
        })
        .await
    }

    async fn revoke(&self, endpoint: &str, form: &FormParams) -> Result<(), AuthError> {
        debug!(%endpoint, "revocation request");
        with_timeout(self.timeout, async {
            let resp = self.client.post(endpoint).form(form).send().await?;
            Self::ensure_success(resp).await.map(|_| ())
        })
        .await
    }

    async fn user_info(
        &self,
        endpoint: &str,
        access_token: &str,
    ) -> Result<serde_json::Value, AuthError> {
        with_timeout(self.timeout, async {
            let resp = self
                .client
                .get(endpoint)
                .bearer_auth(access_token)
                .send()
                .await?;
            let resp = Self::ensure_success(resp).await?;
            Ok(resp.json::<serde_json::Value>().await?)
        })
        .await
    }
}

fn classify_rejection(status: StatusCode, code: Option<String>) -> AuthError {
    let terminal_code = code
        .as_deref()
        .is_some_and(|code| TERMINAL_ERROR_CODES.contains(&code));
    if status == StatusCode::UNAUTHORIZED || (status.is_client_error() && terminal_code) {
        return AuthError::ExpiredOrInvalidGrant;
    }
    AuthError::Rejected {
        status: status.as_u16(),
        error: code,
    }
}

fn extract_error_code(body: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
}
