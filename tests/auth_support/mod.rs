#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use keycloak_session::auth::{
    AuthError, AuthRequest, AuthRequestParams, AuthResponse, AuthorizationFlow, DiscoveryDocument,
    DiscoveryResolver, FormParams, MemoryStorage, MonotonicClock, SecureStorage, Session,
    SessionBuilder, StaticDiscovery, TokenResponse, TokenSet, TokenTransport,
};
use keycloak_session::config::KeycloakConfig;
use reqwest::Url;
use tokio::sync::Notify;

/// Unix time every [`MonotonicClock`] in these tests starts at.
pub const T0: i64 = 1_700_000_000;

pub fn config() -> KeycloakConfig {
    KeycloakConfig::builder()
        .url("https://sso.example.com")
        .realm("staff")
        .client_id("mobile-app")
        .use_pkce(true)
        .refresh_time_buffer(60)
        .build()
}

pub fn tokens(access: &str, refresh: &str, issued_at: i64, expires_in: i64) -> TokenSet {
    TokenSet {
        access_token: access.to_string(),
        refresh_token: refresh.to_string(),
        token_type: "Bearer".to_string(),
        scope: "openid".to_string(),
        issued_at,
        expires_in,
    }
}

pub fn token_reply(access: &str, refresh: Option<&str>, expires_in: i64) -> TokenResponse {
    TokenResponse {
        access_token: access.to_string(),
        token_type: Some("Bearer".to_string()),
        expires_in: Some(expires_in),
        refresh_token: refresh.map(str::to_string),
        scope: Some("openid".to_string()),
        ..TokenResponse::default()
    }
}

pub fn jwt(payload: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{body}.sig")
}

pub fn form_value<'a>(form: &'a FormParams, key: &str) -> Option<&'a str> {
    form.iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

pub fn success(code: &str) -> AuthResponse {
    AuthResponse::Success {
        code: code.to_string(),
        state: Some(FakeFlow::STATE.to_string()),
    }
}

/// Token transport with scripted replies. Unscripted token requests fail
/// with a network error.
#[derive(Default)]
pub struct FakeTransport {
    token_replies: Mutex<VecDeque<Result<TokenResponse, AuthError>>>,
    token_calls: Mutex<Vec<(String, FormParams)>>,
    revoke_calls: Mutex<Vec<FormParams>>,
    revoke_error: Mutex<Option<AuthError>>,
    user_info: Mutex<Option<serde_json::Value>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeTransport {
    pub fn push_token_reply(&self, reply: Result<TokenResponse, AuthError>) {
        self.token_replies.lock().unwrap().push_back(reply);
    }

    pub fn token_calls(&self) -> Vec<(String, FormParams)> {
        self.token_calls.lock().unwrap().clone()
    }

    pub fn revoke_calls(&self) -> Vec<FormParams> {
        self.revoke_calls.lock().unwrap().clone()
    }

    pub fn fail_revoke(&self, error: AuthError) {
        *self.revoke_error.lock().unwrap() = Some(error);
    }

    pub fn set_user_info(&self, info: serde_json::Value) {
        *self.user_info.lock().unwrap() = Some(info);
    }

    /// Park token requests until [`release`](Self::release).
    pub fn hold(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Notify::new()));
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.notify_one();
        }
    }
}

#[async_trait]
impl TokenTransport for FakeTransport {
    async fn request_token(
        &self,
        endpoint: &str,
        form: &FormParams,
    ) -> Result<TokenResponse, AuthError> {
        self.token_calls
            .lock()
            .unwrap()
            .push((endpoint.to_string(), form.clone()));
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.token_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AuthError::Network("no scripted reply".to_string())))
    }

    async fn revoke(&self, _endpoint: &str, form: &FormParams) -> Result<(), AuthError> {
        self.revoke_calls.lock().unwrap().push(form.clone());
        match self.revoke_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn user_info(
        &self,
        _endpoint: &str,
        access_token: &str,
    ) -> Result<serde_json::Value, AuthError> {
        self.user_info
            .lock()
            .unwrap()
            .clone()
            .map(|mut info| {
                info["seen_token"] = serde_json::Value::String(access_token.to_string());
                info
            })
            .ok_or(AuthError::Rejected {
                status: 404,
                error: None,
            })
    }
}

/// Authorization flow that answers prompts from a queue (default `dismiss`).
#[derive(Default)]
pub struct FakeFlow {
    responses: Mutex<VecDeque<AuthResponse>>,
    prompts: Mutex<usize>,
    requests: Mutex<usize>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeFlow {
    pub const STATE: &'static str = "state-1";
    pub const VERIFIER: &'static str = "verifier-1";

    pub fn push_response(&self, response: AuthResponse) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn prompts(&self) -> usize {
        *self.prompts.lock().unwrap()
    }

    /// Number of authorization requests built so far.
    pub fn requests(&self) -> usize {
        *self.requests.lock().unwrap()
    }

    /// Keep prompts open until [`release`](Self::release).
    pub fn hold(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Notify::new()));
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.notify_one();
        }
    }
}

#[async_trait]
impl AuthorizationFlow for FakeFlow {
    async fn create_request(
        &self,
        params: &AuthRequestParams,
        discovery: &DiscoveryDocument,
    ) -> Result<AuthRequest, AuthError> {
        *self.requests.lock().unwrap() += 1;
        Ok(AuthRequest {
            url: discovery.authorization_endpoint()?.to_string(),
            state: Self::STATE.to_string(),
            redirect_uri: params.redirect_uri.clone(),
            code_verifier: params.use_pkce.then(|| Self::VERIFIER.to_string()),
        })
    }

    async fn prompt(&self, _request: &AuthRequest) -> AuthResponse {
        *self.prompts.lock().unwrap() += 1;
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(AuthResponse::Dismiss)
    }
}

/// Storage whose writes always fail; reads see nothing.
#[derive(Default)]
pub struct FailingStorage;

#[async_trait]
impl SecureStorage for FailingStorage {
    async fn get_item(&self, _key: &str) -> Result<Option<String>, AuthError> {
        Err(AuthError::Io("disk unavailable".to_string()))
    }

    async fn set_item(&self, _key: &str, _value: &str) -> Result<(), AuthError> {
        Err(AuthError::Io("disk unavailable".to_string()))
    }

    async fn remove_item(&self, _key: &str) -> Result<(), AuthError> {
        Err(AuthError::Io("disk unavailable".to_string()))
    }
}

/// Storage whose writes can be parked until [`release`](Self::release) or
/// made to fail; reads and removals pass straight through.
pub struct GatedStorage {
    inner: Arc<MemoryStorage>,
    gate: Mutex<Option<Arc<Notify>>>,
    writes: Mutex<usize>,
    failing: Mutex<bool>,
}

impl GatedStorage {
    pub fn new(inner: Arc<MemoryStorage>) -> Self {
        Self {
            inner,
            gate: Mutex::new(None),
            writes: Mutex::new(0),
            failing: Mutex::new(false),
        }
    }

    pub fn fail_writes(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn hold(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Notify::new()));
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.notify_one();
        }
    }

    /// Writes started so far, including parked ones.
    pub fn writes(&self) -> usize {
        *self.writes.lock().unwrap()
    }
}

#[async_trait]
impl SecureStorage for GatedStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, AuthError> {
        self.inner.get_item(key).await
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), AuthError> {
        *self.writes.lock().unwrap() += 1;
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if *self.failing.lock().unwrap() {
            return Err(AuthError::Io("disk unavailable".to_string()));
        }
        self.inner.set_item(key, value).await
    }

    async fn remove_item(&self, key: &str) -> Result<(), AuthError> {
        self.inner.remove_item(key).await
    }
}

/// Discovery that fails its first `failures` lookups, then serves `doc`.
pub struct FlakyDiscovery {
    doc: DiscoveryDocument,
    failures: Mutex<usize>,
    calls: Mutex<usize>,
}

impl FlakyDiscovery {
    pub fn new(doc: DiscoveryDocument, failures: usize) -> Self {
        Self {
            doc,
            failures: Mutex::new(failures),
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl DiscoveryResolver for FlakyDiscovery {
    async fn resolve(&self, _issuer: &Url) -> Result<DiscoveryDocument, AuthError> {
        *self.calls.lock().unwrap() += 1;
        let mut failures = self.failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(AuthError::Network("connection refused".to_string()));
        }
        Ok(self.doc.clone())
    }
}

/// Collaborators for one session under test.
pub struct Harness {
    pub config: KeycloakConfig,
    pub storage: Arc<MemoryStorage>,
    pub transport: Arc<FakeTransport>,
    pub flow: Arc<FakeFlow>,
}

impl Harness {
    pub fn new(config: KeycloakConfig) -> Self {
        Self {
            config,
            storage: Arc::new(MemoryStorage::new()),
            transport: Arc::new(FakeTransport::default()),
            flow: Arc::new(FakeFlow::default()),
        }
    }

    pub fn discovery_document(&self) -> DiscoveryDocument {
        DiscoveryDocument::keycloak(&self.config.realm_url().unwrap())
    }

    pub fn builder_with(&self, storage: Arc<dyn SecureStorage>) -> SessionBuilder {
        SessionBuilder::new(self.config.clone(), storage, self.flow.clone())
            .with_transport(self.transport.clone())
            .with_discovery(Arc::new(StaticDiscovery(self.discovery_document())))
            .with_clock(Arc::new(MonotonicClock::starting_at(T0)))
    }

    pub fn builder(&self) -> SessionBuilder {
        self.builder_with(self.storage.clone())
    }

    pub async fn mount(&self) -> Session {
        self.builder().mount().await
    }

    /// Mount and log in with `access-1` / `refresh-1`, valid for an hour.
    pub async fn logged_in(&self) -> Session {
        let session = self.mount().await;
        self.flow.push_response(success("abc"));
        self.transport
            .push_token_reply(Ok(token_reply("access-1", Some("refresh-1"), 3600)));
        session.login().await.unwrap();
        assert!(session.is_logged_in());
        session
    }

    pub async fn seed(&self, tokens: &TokenSet) {
        self.storage
            .set_item(
                &self.config.token_storage_key,
                &serde_json::to_string(tokens).unwrap(),
            )
            .await
            .unwrap();
    }

    /// The persisted token set; `None` when the key was never written.
    pub fn stored(&self) -> Option<TokenSet> {
        self.storage
            .peek(&self.config.token_storage_key)
            .map(|raw| serde_json::from_str(&raw).unwrap())
    }
}
