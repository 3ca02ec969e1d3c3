//! Console authorization flow: print the authorize URL, read the redirect back.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::auth::flow::authorize_url;
use crate::auth::{
    AuthError, AuthRequest, AuthRequestParams, AuthResponse, AuthorizationFlow, DiscoveryDocument,
};

/// Flow for terminals: the user opens the URL in any browser and pastes the
/// redirect URL (or the bare code) back.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleFlow;

#[async_trait]
impl AuthorizationFlow for ConsoleFlow {
    async fn create_request(
        &self,
        params: &AuthRequestParams,
        discovery: &DiscoveryDocument,
    ) -> Result<AuthRequest, AuthError> {
        let state = uuid::Uuid::new_v4().simple().to_string();
        let code_verifier = params.use_pkce.then(generate_code_verifier);
        let challenge = code_verifier.as_deref().map(compute_code_challenge);
        let url = authorize_url(discovery, params, &state, challenge.as_deref())?;
        Ok(AuthRequest {
            url,
            state,
            redirect_uri: params.redirect_uri.clone(),
            code_verifier,
        })
    }

    async fn prompt(&self, request: &AuthRequest) -> AuthResponse {
        println!("🔗 Visit: {}", request.url);
        println!("📋 After authorizing, paste the redirect URL (or code) below:");
        print!("> ");

        let line = tokio::task::spawn_blocking(|| {
            use std::io::Write;
            let _ = std::io::stdout().flush();
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| line)
        })
        .await;

        match line {
            Ok(Ok(line)) => parse_pasted(&line, &request.state),
            _ => AuthResponse::Cancel,
        }
    }
}

/// A pasted line is a redirect URL/query, or a bare authorization code.
fn parse_pasted(line: &str, state: &str) -> AuthResponse {
    let line = line.trim();
    if line.is_empty() {
        return AuthResponse::Dismiss;
    }
    if line.contains('=') {
        return AuthResponse::from_redirect(line);
    }
    AuthResponse::Success {
        code: line.to_string(),
        state: Some(state.to_string()),
    }
}

fn generate_code_verifier() -> String {
    let mut buf = [0u8; 32];
    for chunk in buf.chunks_mut(16) {
        let id = uuid::Uuid::new_v4();
        chunk.copy_from_slice(&id.as_bytes()[..chunk.len()]);
    }
    URL_SAFE_NO_PAD.encode(buf)
}

fn compute_code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
