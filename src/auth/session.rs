//! Session facade: the one owner of the current token set.
//!
//! Provides the application-facing surface:
//! - [`Session::bootstrap`]: hydrate from storage and prepare the auth request
//! - [`Session::login`]: prompt the user and commit the exchanged tokens
//! - [`Session::handle_auth_response`]: commit a redirect delivered out of band
//! - [`Session::refresh`]: refresh now instead of waiting for the timer
//! - [`Session::logout`]: clear the session, optionally revoking it upstream
//! - [`Session::snapshot`] / [`Session::watch`]: observe state changes
//!
//! Every token mutation goes through one commit path serialized by an async
//! mutex. Results that started before the latest explicit login or logout
//! carry a stale generation and are dropped there.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::claims::Claims;
use super::clock::{Clock, SystemClock};
use super::discovery::{DiscoveryDocument, DiscoveryResolver, HttpDiscovery};
use super::error::AuthError;
use super::exchange::{self, ClientParams, RefreshFailure};
use super::flow::{AuthRequest, AuthRequestParams, AuthResponse, AuthorizationFlow};
use super::scheduler::{RefreshScheduler, RefreshState};
use super::store::{SecureStorage, TokenStore};
use super::token::TokenSet;
use super::transport::{HttpTransport, TokenTransport};
use crate::config::KeycloakConfig;

/// Point-in-time view of the session.
///
/// Subscribe to changes via [`Session::watch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// The token store has been read since the session was built.
    pub hydrated: bool,
    /// Hydrated, bootstrapped, and an authorization request exists.
    pub ready: bool,
    pub logged_in: bool,
    pub refresh: RefreshState,
}

/// Result of [`Session::refresh`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// New tokens were committed.
    Refreshed(TokenSet),
    /// The grant was rejected and the session was cleared.
    SessionEnded(AuthError),
    /// The refresh failed transiently; the session is unchanged.
    Deferred(AuthError),
    /// A login or logout happened while the refresh was in flight.
    Superseded,
}

/// Assembles a [`Session`] from its collaborators.
///
/// Transport, discovery and clock default to [`HttpTransport`],
/// [`HttpDiscovery`] and [`SystemClock`].
pub struct SessionBuilder {
    config: KeycloakConfig,
    storage: Arc<dyn SecureStorage>,
    flow: Arc<dyn AuthorizationFlow>,
    transport: Option<Arc<dyn TokenTransport>>,
    discovery: Option<Arc<dyn DiscoveryResolver>>,
    clock: Option<Arc<dyn Clock>>,
}

impl SessionBuilder {
    pub fn new(
        config: KeycloakConfig,
        storage: Arc<dyn SecureStorage>,
        flow: Arc<dyn AuthorizationFlow>,
    ) -> Self {
        Self {
            config,
            storage,
            flow,
            transport: None,
            discovery: None,
            clock: None,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn TokenTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn DiscoveryResolver>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build an unhydrated session. Call [`Session::bootstrap`] next.
    pub fn build(self) -> Session {
        let client = ClientParams {
            client_id: self.config.client_id.clone(),
            client_secret: self.config.client_secret.clone(),
            redirect_uri: self.config.redirect_uri(),
            scope: self.config.scope(),
            use_pkce: self.config.use_pkce,
        };
        let store = TokenStore::new(self.storage, self.config.token_storage_key.clone());
        let scheduler = RefreshScheduler::new(self.config.refresh_time_buffer);
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        let inner = SessionInner {
            client,
            store,
            flow: self.flow,
            transport: self
                .transport
                .unwrap_or_else(|| Arc::new(HttpTransport::new())),
            discovery: self
                .discovery
                .unwrap_or_else(|| Arc::new(HttpDiscovery::new())),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            config: self.config,
            state: Mutex::new(SessionState::default()),
            scheduler: Mutex::new(scheduler),
            generation: AtomicU64::new(0),
            bootstrap_started: AtomicBool::new(false),
            commit_lock: tokio::sync::Mutex::new(()),
            snapshot,
        };
        Session {
            inner: Arc::new(inner),
        }
    }

    /// Build and bootstrap in one step.
    pub async fn mount(self) -> Session {
        let session = self.build();
        session.bootstrap().await;
        session
    }
}

#[derive(Default)]
struct SessionState {
    hydrated: bool,
    bootstrapped: bool,
    tokens: TokenSet,
    request: Option<AuthRequest>,
    discovery: Option<DiscoveryDocument>,
}

struct SessionInner {
    config: KeycloakConfig,
    client: ClientParams,
    store: TokenStore,
    flow: Arc<dyn AuthorizationFlow>,
    transport: Arc<dyn TokenTransport>,
    discovery: Arc<dyn DiscoveryResolver>,
    clock: Arc<dyn Clock>,
    state: Mutex<SessionState>,
    scheduler: Mutex<RefreshScheduler>,
    generation: AtomicU64,
    bootstrap_started: AtomicBool,
    commit_lock: tokio::sync::Mutex<()>,
    snapshot: watch::Sender<SessionSnapshot>,
}

/// Handle to one application's Keycloak session.
///
/// Cheap to clone; all clones share the same state. The pending refresh timer
/// is cancelled when the last clone is dropped.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
///
/// use keycloak_session::auth::{AuthorizationFlow, FileStorage, SessionBuilder};
/// use keycloak_session::config::KeycloakConfig;
///
/// # async fn example(flow: Arc<dyn AuthorizationFlow>) -> Result<(), keycloak_session::auth::AuthError> {
/// let config = KeycloakConfig::builder()
///     .url("https://sso.example.com")
///     .realm("staff")
///     .client_id("mobile-app")
///     .use_pkce(true)
///     .build();
/// let session = SessionBuilder::new(config, Arc::new(FileStorage::new_default()), flow)
///     .mount()
///     .await;
/// if !session.is_logged_in() {
///     session.login().await?;
/// }
/// println!("token: {:?}", session.access_token());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Hydrate from the token store, resolve discovery, build the auth
    /// request, and either arm the refresh timer (fresh tokens) or refresh
    /// immediately (stale tokens). Runs once; later calls only return the
    /// current snapshot.
    pub async fn bootstrap(&self) -> SessionSnapshot {
        if !self.inner.bootstrap_started.swap(true, Ordering::SeqCst) {
            self.inner.bootstrap().await;
        }
        self.snapshot()
    }

    /// Prompt the user through the authorization flow.
    ///
    /// The pending refresh timer is cancelled before the prompt opens. The
    /// outcome is committed through the same path as
    /// [`handle_auth_response`](Self::handle_auth_response); failures to
    /// exchange are logged, and the prompt's outcome is returned either way.
    ///
    /// Discovery and the authorization request are built again here when
    /// bootstrap could not build them.
    pub async fn login(&self) -> Result<AuthResponse, AuthError> {
        if !self.inner.state().bootstrapped {
            return Err(AuthError::NotReady);
        }
        let generation = self.inner.take_over().await;
        info!(generation, "starting login");
        let Some(request) = self.inner.ensure_request().await else {
            self.inner.rearm(generation).await;
            return Err(AuthError::NotReady);
        };

        let response = self.inner.flow.prompt(&request).await;
        debug!(outcome = response.kind(), "authorization prompt finished");
        match self.inner.handle_response(&response, generation).await {
            Ok(_) => info!("login complete"),
            Err(err) => warn!(error = %err, outcome = response.kind(), "login did not produce a session"),
        }
        Ok(response)
    }

    /// Commit an authorization response delivered outside [`login`](Self::login),
    /// e.g. a deep-link redirect.
    ///
    /// Success exchanges the code and commits the tokens. An `error` response
    /// ends the current session. `cancel` and `dismiss` change nothing.
    pub async fn handle_auth_response(&self, response: &AuthResponse) -> Result<TokenSet, AuthError> {
        let generation = self.inner.generation.load(Ordering::SeqCst);
        self.inner.handle_response(response, generation).await
    }

    /// Refresh now with the held refresh token.
    ///
    /// Only a missing session is an `Err`; refresh failures are reported as
    /// the [`RefreshOutcome`] they caused.
    pub async fn refresh(&self) -> Result<RefreshOutcome, AuthError> {
        let tokens = self.tokens();
        if tokens.is_empty() {
            return Err(AuthError::NotLoggedIn);
        }
        let generation = self.inner.generation.load(Ordering::SeqCst);
        Ok(self.inner.run_refresh(&tokens, generation).await)
    }

    /// End the session.
    ///
    /// With `everywhere`, the refresh and access tokens are revoked first on a
    /// best-effort basis. Local state is cleared regardless of revocation.
    pub async fn logout(&self, everywhere: bool) -> Result<(), AuthError> {
        let tokens = self.tokens();
        if tokens.is_empty() {
            return Err(AuthError::NotLoggedIn);
        }
        let generation = self.inner.take_over().await;
        info!(generation, everywhere, "logging out");

        if everywhere {
            self.inner.revoke_upstream(&tokens).await;
        }
        self.inner.clear().await;
        Ok(())
    }

    /// Fetch the userinfo document for the current access token.
    pub async fn load_user_info(&self) -> Result<serde_json::Value, AuthError> {
        let tokens = self.tokens();
        if tokens.is_empty() {
            return Err(AuthError::NotLoggedIn);
        }
        let discovery = self
            .inner
            .ensure_discovery()
            .await
            .ok_or(AuthError::MissingEndpoint("userinfo endpoint"))?;
        let endpoint = discovery.userinfo_endpoint()?;
        self.inner
            .transport
            .user_info(endpoint, &tokens.access_token)
            .await
    }

    /// Current token set; the sentinel when logged out or not yet hydrated.
    pub fn tokens(&self) -> TokenSet {
        self.inner.state().tokens.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        let tokens = self.tokens();
        (!tokens.access_token.is_empty()).then_some(tokens.access_token)
    }

    pub fn is_logged_in(&self) -> bool {
        self.inner.snapshot_now().logged_in
    }

    pub fn is_ready(&self) -> bool {
        self.inner.snapshot_now().ready
    }

    pub fn is_hydrated(&self) -> bool {
        self.inner.state().hydrated
    }

    pub fn refresh_state(&self) -> RefreshState {
        self.inner.scheduler().state()
    }

    /// The current authorization request. A new one replaces it after every
    /// answered prompt.
    pub fn auth_request(&self) -> Option<AuthRequest> {
        self.inner.state().request.clone()
    }

    pub fn discovery(&self) -> Option<DiscoveryDocument> {
        self.inner.state().discovery.clone()
    }

    pub fn config(&self) -> &KeycloakConfig {
        &self.inner.config
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot_now()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Claims of the current access token (empty when logged out).
    pub fn claims(&self) -> Claims {
        Claims::decode(&self.tokens().access_token)
    }

    pub fn has_realm_role(&self, role: &str) -> bool {
        self.claims().has_realm_role(role)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionInner {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        lock(&self.state)
    }

    fn scheduler(&self) -> MutexGuard<'_, RefreshScheduler> {
        lock(&self.scheduler)
    }

    fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn snapshot_now(&self) -> SessionSnapshot {
        let (hydrated, bootstrapped, has_request, logged_in) = {
            let state = self.state();
            (
                state.hydrated,
                state.bootstrapped,
                state.request.is_some(),
                state.hydrated && !state.tokens.is_empty(),
            )
        };
        SessionSnapshot {
            hydrated,
            ready: hydrated && bootstrapped && has_request,
            logged_in,
            refresh: self.scheduler().state(),
        }
    }

    fn publish(&self) {
        let next = self.snapshot_now();
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    /// Cancel the pending refresh and retire in-flight results before an
    /// explicit login or logout. Waits out a commit that is already writing.
    async fn take_over(&self) -> u64 {
        let _guard = self.commit_lock.lock().await;
        if self.scheduler().cancel() {
            debug!("pending refresh cancelled");
        }
        let generation = self.bump_generation();
        self.publish();
        generation
    }

    /// The discovery document, resolved again when no earlier attempt
    /// succeeded.
    async fn ensure_discovery(&self) -> Option<DiscoveryDocument> {
        let cached = self.state().discovery.clone();
        if cached.is_some() {
            return cached;
        }
        let issuer = match self.config.realm_url() {
            Ok(issuer) => issuer,
            Err(err) => {
                warn!(error = %err, "invalid realm URL");
                return None;
            }
        };
        match self.discovery.resolve(&issuer).await {
            Ok(doc) => {
                let doc = self.state().discovery.get_or_insert(doc).clone();
                self.publish();
                Some(doc)
            }
            Err(err) => {
                warn!(%issuer, error = %err, "discovery failed");
                None
            }
        }
    }

    /// The authorization request, built (with discovery) when missing.
    async fn ensure_request(&self) -> Option<AuthRequest> {
        let cached = self.state().request.clone();
        if cached.is_some() {
            return cached;
        }
        let doc = self.ensure_discovery().await?;
        let request = self.build_request(&doc).await?;
        let request = self.state().request.get_or_insert(request).clone();
        self.publish();
        Some(request)
    }

    /// Replace the authorization request after the identity provider
    /// answered it, so every authorization gets its own state and verifier.
    async fn renew_request(&self) {
        let Some(doc) = self.state().discovery.clone() else {
            return;
        };
        if let Some(request) = self.build_request(&doc).await {
            self.state().request = Some(request);
            debug!("authorization request renewed");
        }
    }

    async fn build_request(&self, doc: &DiscoveryDocument) -> Option<AuthRequest> {
        let params = AuthRequestParams {
            client_id: self.client.client_id.clone(),
            redirect_uri: self.client.redirect_uri.clone(),
            scopes: self.config.scopes.clone(),
            use_pkce: self.config.use_pkce,
            extra_params: BTreeMap::new(),
        };
        match self.flow.create_request(&params, doc).await {
            Ok(request) => Some(request),
            Err(err) => {
                warn!(error = %err, "could not build authorization request");
                None
            }
        }
    }

    async fn bootstrap(self: &Arc<Self>) {
        let generation = self.generation.load(Ordering::SeqCst);
        let tokens = self.store.get().await;
        {
            let mut state = self.state();
            state.hydrated = true;
            state.tokens = tokens.clone();
        }
        debug!(logged_in = !tokens.is_empty(), "session hydrated");
        self.publish();

        if self.ensure_request().await.is_none() {
            warn!("no authorization request yet; login will retry discovery");
        }

        if !tokens.is_empty() {
            let now = self.clock.now_unix();
            if tokens.is_fresh(now, self.config.refresh_time_buffer) {
                self.rearm(generation).await;
            } else {
                debug!("rehydrated tokens are stale; refreshing before ready");
                self.run_refresh(&tokens, generation).await;
            }
        }

        self.state().bootstrapped = true;
        self.publish();
    }

    async fn handle_response(
        self: &Arc<Self>,
        response: &AuthResponse,
        generation: u64,
    ) -> Result<TokenSet, AuthError> {
        let request = self.state().request.clone();
        let discovery = self.ensure_discovery().await;
        let now = self.clock.now_unix();
        let result = exchange::exchange_code(
            self.transport.as_ref(),
            response,
            request.as_ref(),
            discovery.as_ref(),
            &self.client,
            now,
        )
        .await;

        let answered = matches!(response, AuthResponse::Success { .. } | AuthResponse::Error { .. });
        if answered && !matches!(result, Err(AuthError::StateMismatch)) {
            self.renew_request().await;
        }

        match result {
            Ok(tokens) => {
                if self.commit(Some(tokens), generation).await {
                    Ok(self.state().tokens.clone())
                } else {
                    Err(AuthError::Superseded)
                }
            }
            Err(err) if err.is_terminal() => {
                warn!(error = %err, "authorization failed; ending session");
                self.commit(None, generation).await;
                Err(err)
            }
            Err(err) => {
                if err != AuthError::Cancelled {
                    warn!(error = %err, "code exchange failed; keeping current session");
                }
                self.rearm(generation).await;
                Err(err)
            }
        }
    }

    async fn run_refresh(self: &Arc<Self>, tokens: &TokenSet, generation: u64) -> RefreshOutcome {
        let discovery = self.ensure_discovery().await;
        let now = self.clock.now_unix();
        let result = exchange::refresh(
            self.transport.as_ref(),
            &tokens.refresh_token,
            discovery.as_ref(),
            &self.client,
            now,
        )
        .await;

        match result {
            Ok(next) => {
                if self.commit(Some(next), generation).await {
                    info!("token set refreshed");
                    RefreshOutcome::Refreshed(self.state().tokens.clone())
                } else {
                    RefreshOutcome::Superseded
                }
            }
            Err(RefreshFailure::Terminal(err)) => {
                warn!(error = %err, "refresh grant rejected; ending session");
                if self.commit(None, generation).await {
                    RefreshOutcome::SessionEnded(err)
                } else {
                    RefreshOutcome::Superseded
                }
            }
            Err(RefreshFailure::Transient(err)) => {
                warn!(error = %err, "token refresh failed; keeping current session");
                RefreshOutcome::Deferred(err)
            }
        }
    }

    fn on_timer(self: Arc<Self>, id: u64) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if !self.scheduler().begin_refresh(id) {
                return;
            }
            self.publish();
            let generation = self.generation.load(Ordering::SeqCst);
            let tokens = self.state().tokens.clone();
            let now = self.clock.now_unix();

            if tokens.is_empty() {
                self.commit(None, generation).await;
            } else if tokens.is_fresh(now, self.config.refresh_time_buffer) {
                debug!(timer = id, "tokens still fresh at fire time; re-arming");
                self.rearm(generation).await;
            } else {
                self.run_refresh(&tokens, generation).await;
            }

            self.scheduler().finish_refresh(id);
            self.publish();
        })
    }

    fn arm(self: &Arc<Self>, tokens: &TokenSet) {
        if self.config.disable_auto_refresh {
            return;
        }
        let weak = Arc::downgrade(self);
        let now = self.clock.now_unix();
        self.scheduler().arm(tokens, now, move |id| async move {
            if let Some(inner) = weak.upgrade() {
                inner.on_timer(id).await;
            }
        });
    }

    /// The single commit path. `None` clears the session.
    ///
    /// Returns `false` when the commit was dropped because `generation` is
    /// stale or the merged set is incomplete.
    async fn commit(self: &Arc<Self>, next: Option<TokenSet>, generation: u64) -> bool {
        let _guard = self.commit_lock.lock().await;
        if !self.is_current(generation) {
            debug!(generation, "discarding result from a superseded session");
            return false;
        }

        match next {
            Some(next) => {
                let merged = next.merged_over(&self.state().tokens);
                if !merged.is_complete() {
                    warn!("refusing to commit an incomplete token set");
                    return false;
                }
                self.scheduler().cancel();
                self.store.put(&merged).await;
                self.state().tokens = merged.clone();
                self.arm(&merged);
            }
            None => {
                self.scheduler().cancel();
                self.store.reset().await;
                self.state().tokens = TokenSet::empty();
            }
        }
        self.publish();
        true
    }

    /// Clear unconditionally and retire every in-flight result.
    async fn clear(self: &Arc<Self>) {
        let _guard = self.commit_lock.lock().await;
        self.bump_generation();
        self.scheduler().cancel();
        self.store.reset().await;
        self.state().tokens = TokenSet::empty();
        self.publish();
    }

    /// Arm from the held tokens when nothing is pending.
    async fn rearm(self: &Arc<Self>, generation: u64) {
        let _guard = self.commit_lock.lock().await;
        if !self.is_current(generation) || self.scheduler().is_armed() {
            return;
        }
        let tokens = self.state().tokens.clone();
        if !tokens.is_empty() {
            self.arm(&tokens);
        }
        self.publish();
    }

    async fn revoke_upstream(&self, tokens: &TokenSet) {
        let discovery = self.ensure_discovery().await;
        for (token, hint) in [
            (&tokens.refresh_token, "refresh_token"),
            (&tokens.access_token, "access_token"),
        ] {
            if token.is_empty() {
                continue;
            }
            if let Err(err) = exchange::revoke(
                self.transport.as_ref(),
                token,
                hint,
                discovery.as_ref(),
                &self.client,
            )
            .await
            {
                warn!(error = %err, token_type_hint = hint, "token revocation failed");
            }
        }
    }
}
