//! Persisted credential bundle.

use serde::{Deserialize, Serialize};

/// Access/refresh credential bundle.
///
/// Absence is represented by [`TokenSet::empty`] (empty strings, zero
/// numerics), never by a half-populated value. The persisted JSON layout uses
/// camelCase keys.
///
/// # Example
/// ```
/// use keycloak_session::auth::TokenSet;
///
/// let tokens = TokenSet {
///     access_token: "access".to_string(),
///     refresh_token: "refresh".to_string(),
///     token_type: "Bearer".to_string(),
///     scope: "openid".to_string(),
///     issued_at: 1_700_000_000,
///     expires_in: 3600,
/// };
/// assert!(tokens.is_complete());
/// assert_eq!(tokens.refresh_due_at(60), 1_700_003_540);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub scope: String,
    /// Unix seconds at which the set was minted.
    pub issued_at: i64,
    /// Access token lifetime in seconds, counted from `issued_at`.
    pub expires_in: i64,
}

impl TokenSet {
    /// The "no session" sentinel.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Every credential field is populated and the lifetime is positive.
    pub fn is_complete(&self) -> bool {
        !self.access_token.is_empty()
            && !self.refresh_token.is_empty()
            && !self.token_type.is_empty()
            && self.issued_at > 0
            && self.expires_in > 0
    }

    /// Overlay the populated fields of `self` onto `previous`.
    ///
    /// Empty strings and non-positive numerics count as "not provided", so a
    /// refresh response that omits the refresh token keeps the previous one.
    pub fn merged_over(&self, previous: &TokenSet) -> TokenSet {
        fn pick(next: &str, prev: &str) -> String {
            if next.is_empty() { prev } else { next }.to_string()
        }
        fn pick_num(next: i64, prev: i64) -> i64 {
            if next > 0 {
                next
            } else {
                prev
            }
        }
        TokenSet {
            access_token: pick(&self.access_token, &previous.access_token),
            refresh_token: pick(&self.refresh_token, &previous.refresh_token),
            token_type: pick(&self.token_type, &previous.token_type),
            scope: pick(&self.scope, &previous.scope),
            issued_at: pick_num(self.issued_at, previous.issued_at),
            expires_in: pick_num(self.expires_in, previous.expires_in),
        }
    }

    /// Unix seconds at which the access token expires.
    pub fn expires_at(&self) -> i64 {
        self.issued_at.saturating_add(self.expires_in)
    }

    /// Unix seconds at which a refresh should run: `buffer` seconds before
    /// expiry, but never before `issued_at`.
    pub fn refresh_due_at(&self, buffer_secs: u64) -> i64 {
        let buffer = i64::try_from(buffer_secs).unwrap_or(i64::MAX);
        self.issued_at
            .saturating_add(self.expires_in.saturating_sub(buffer).max(0))
    }

    /// Whether the set stays usable for at least `buffer_secs` beyond `now`.
    pub fn is_fresh(&self, now: i64, buffer_secs: u64) -> bool {
        !self.access_token.is_empty() && now < self.refresh_due_at(buffer_secs)
    }
}
