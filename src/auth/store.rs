use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::error::AuthError;
use super::token::TokenSet;

/// Async secure key-value persistence the session writes through.
#[async_trait]
pub trait SecureStorage: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>, AuthError>;
    async fn set_item(&self, key: &str, value: &str) -> Result<(), AuthError>;
    async fn remove_item(&self, key: &str) -> Result<(), AuthError>;
}

/// Process-local storage; contents are lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous read, mostly useful for assertions.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }
}

#[async_trait]
impl SecureStorage for MemoryStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, AuthError> {
        Ok(self.peek(key))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), AuthError> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), AuthError> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key);
        Ok(())
    }
}

/// File-backed storage: one JSON document per key under `base_dir`.
///
/// # Example
/// ```no_run
/// use keycloak_session::auth::{FileStorage, SecureStorage};
///
/// # async fn example() -> Result<(), keycloak_session::auth::AuthError> {
/// let storage = FileStorage::new_default();
/// storage.set_item("session", "{}").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FileStorage {
    base_dir: PathBuf,
}

impl FileStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn new_default() -> Self {
        Self::new(Self::default_dir())
    }

    pub fn default_dir() -> PathBuf {
        directories::UserDirs::new()
            .map(|dirs| dirs.home_dir().join(".keycloak-session"))
            .unwrap_or_else(|| PathBuf::from(".keycloak-session"))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn item_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", normalize_label(key)))
    }
}

#[async_trait]
impl SecureStorage for FileStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, AuthError> {
        match tokio::fs::read_to_string(self.item_path(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), AuthError> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let path = self.item_path(key);
        let tmp = path.with_extension(format!("json.tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, value).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }
        if let Err(err) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), AuthError> {
        match tokio::fs::remove_file(self.item_path(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Durable copy of the current [`TokenSet`], stored as JSON under one key.
///
/// Reads never fail: missing, unreadable, corrupt or partial values all come
/// back as [`TokenSet::empty`]. Writes that fail are logged and reported as
/// `false` so the caller's in-memory state stays authoritative.
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn SecureStorage>,
    key: String,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn SecureStorage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn get(&self) -> TokenSet {
        match self.load().await {
            Ok(tokens) => tokens,
            Err(err) => {
                warn!(key = %self.key, error = %err, "token store read failed; treating as no session");
                TokenSet::empty()
            }
        }
    }

    /// Merge `tokens` over the persisted value and write the result.
    ///
    /// Returns the merged set together with whether the write landed.
    pub async fn set(&self, tokens: &TokenSet) -> (TokenSet, bool) {
        let merged = tokens.merged_over(&self.get().await);
        let written = self.write(&merged).await;
        (merged, written)
    }

    /// Persist `tokens` as given, replacing whatever is stored.
    pub async fn put(&self, tokens: &TokenSet) -> bool {
        self.write(tokens).await
    }

    /// Persist the sentinel.
    pub async fn reset(&self) -> bool {
        self.write(&TokenSet::empty()).await
    }

    async fn load(&self) -> Result<TokenSet, AuthError> {
        let Some(raw) = self.storage.get_item(&self.key).await? else {
            return Ok(TokenSet::empty());
        };
        let tokens: TokenSet = serde_json::from_str(&raw)?;
        if tokens.is_empty() || tokens.is_complete() {
            Ok(tokens)
        } else {
            Err(AuthError::IncompleteTokenSet)
        }
    }

    async fn write(&self, tokens: &TokenSet) -> bool {
        let result = match serde_json::to_string(tokens) {
            Ok(serialized) => self.storage.set_item(&self.key, &serialized).await,
            Err(err) => Err(err.into()),
        };
        match result {
            Ok(()) => {
                debug!(key = %self.key, empty = tokens.is_empty(), "token set persisted");
                true
            }
            Err(err) => {
                warn!(key = %self.key, error = %err, "token store write failed");
                false
            }
        }
    }
}

fn normalize_label(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "default".to_string();
    }
    let out: String = trimmed
        .chars()
        .map(|ch| {
            let lower = ch.to_ascii_lowercase();
            if lower.is_ascii_alphanumeric() || lower == '-' || lower == '_' {
                lower
            } else {
                '-'
            }
        })
        .collect();
    if out.trim_matches('-').is_empty() {
        "default".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    struct BrokenStorage;

    #[async_trait]
    impl SecureStorage for BrokenStorage {
        async fn get_item(&self, _key: &str) -> Result<Option<String>, AuthError> {
            Err(AuthError::Io("disk on fire".to_string()))
        }
        async fn set_item(&self, _key: &str, _value: &str) -> Result<(), AuthError> {
            Err(AuthError::Io("disk on fire".to_string()))
        }
        async fn remove_item(&self, _key: &str) -> Result<(), AuthError> {
            Err(AuthError::Io("disk on fire".to_string()))
        }
    }

    fn sample() -> TokenSet {
        TokenSet {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            token_type: "Bearer".to_string(),
            scope: "openid".to_string(),
            issued_at: 1_000,
            expires_in: 3600,
        }
    }

    fn memory_store() -> (Arc<MemoryStorage>, TokenStore) {
        let storage = Arc::new(MemoryStorage::new());
        let store = TokenStore::new(storage.clone(), "tokens");
        (storage, store)
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let (_storage, store) = memory_store();
        let (merged, written) = store.set(&sample()).await;
        assert!(written);
        assert_eq!(merged, sample());
        assert_eq!(store.get().await, sample());
    }

    #[tokio::test]
    async fn reset_writes_sentinel_instead_of_deleting() {
        let (storage, store) = memory_store();
        store.set(&sample()).await;
        assert!(store.reset().await);
        assert!(store.get().await.is_empty());
        let raw = storage.peek("tokens").expect("key should still exist");
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["accessToken"], "");
        assert_eq!(json["expiresIn"], 0);
    }

    #[tokio::test]
    async fn set_merges_over_persisted_value() {
        let (_storage, store) = memory_store();
        store.set(&sample()).await;
        let update = TokenSet {
            access_token: "access-2".to_string(),
            issued_at: 2_000,
            expires_in: 600,
            ..TokenSet::default()
        };
        let (merged, _) = store.set(&update).await;
        assert_eq!(merged.refresh_token, "refresh");
        assert_eq!(merged.access_token, "access-2");
        assert_eq!(store.get().await, merged);
    }

    #[tokio::test]
    async fn put_replaces_persisted_value() {
        let (_storage, store) = memory_store();
        store.set(&sample()).await;
        let replacement = TokenSet {
            access_token: "access-2".to_string(),
            refresh_token: "refresh-2".to_string(),
            scope: String::new(),
            ..sample()
        };
        assert!(store.put(&replacement).await);
        assert_eq!(store.get().await, replacement);
    }

    #[tokio::test]
    async fn corrupt_value_reads_as_sentinel() {
        let (storage, store) = memory_store();
        storage.set_item("tokens", "{not-json").await.unwrap();
        assert!(store.get().await.is_empty());
    }

    #[tokio::test]
    async fn partial_value_reads_as_sentinel() {
        let (storage, store) = memory_store();
        storage
            .set_item("tokens", r#"{"accessToken":"only-this"}"#)
            .await
            .unwrap();
        assert!(store.get().await.is_empty());
    }

    #[tokio::test]
    async fn broken_storage_degrades_without_error() {
        let store = TokenStore::new(Arc::new(BrokenStorage), "tokens");
        assert!(store.get().await.is_empty());
        let (merged, written) = store.set(&sample()).await;
        assert!(!written);
        assert_eq!(merged, sample());
        assert!(!store.reset().await);
    }

    #[test]
    fn normalize_label_replaces_symbols() {
        assert_eq!(normalize_label("$KEYCLOAK_AUTH_TOKEN$"), "-keycloak_auth_token-");
        assert_eq!(normalize_label("  "), "default");
        assert_eq!(normalize_label("$$"), "default");
    }
}
