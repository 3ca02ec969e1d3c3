//! Read-only view of an access token's claims.
//!
//! Decoding does not verify the signature; it exists for UI and role checks
//! only and never affects the session lifecycle.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{Map, Value};

/// Decoded JWT payload. Malformed tokens decode to an empty map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Claims(Map<String, Value>);

impl Claims {
    pub fn decode(token: &str) -> Self {
        let mut segments = token.split('.');
        let (Some(_header), Some(payload), Some(_signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Self::default();
        };
        URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .ok()
            .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
            .and_then(|value| match value {
                Value::Object(map) => Some(Self(map)),
                _ => None,
            })
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, claim: &str) -> Option<&Value> {
        self.0.get(claim)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn subject(&self) -> Option<&str> {
        self.str_claim("sub")
    }

    pub fn preferred_username(&self) -> Option<&str> {
        self.str_claim("preferred_username")
    }

    pub fn email(&self) -> Option<&str> {
        self.str_claim("email")
    }

    /// `exp` in unix seconds.
    pub fn expires_at(&self) -> Option<i64> {
        self.0.get("exp").and_then(Value::as_i64)
    }

    /// `realm_access.roles`, empty when absent.
    pub fn realm_roles(&self) -> Vec<&str> {
        roles_at(self.0.get("realm_access"))
    }

    pub fn has_realm_role(&self, role: &str) -> bool {
        self.realm_roles().contains(&role)
    }

    /// `resource_access.{client}.roles`, empty when absent.
    pub fn resource_roles(&self, client: &str) -> Vec<&str> {
        roles_at(
            self.0
                .get("resource_access")
                .and_then(|access| access.get(client)),
        )
    }

    pub fn has_resource_role(&self, client: &str, role: &str) -> bool {
        self.resource_roles(client).contains(&role)
    }

    fn str_claim(&self, claim: &str) -> Option<&str> {
        self.0.get(claim).and_then(Value::as_str)
    }
}

fn roles_at(access: Option<&Value>) -> Vec<&str> {
    access
        .and_then(|access| access.get("roles"))
        .and_then(Value::as_array)
        .map(|roles| roles.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// Decode `access_token`'s claims.
pub fn decode(access_token: &str) -> Claims {
    Claims::decode(access_token)
}

/// Whether `claims` grant realm role `role`.
pub fn has_role(claims: &Claims, role: &str) -> bool {
    claims.has_realm_role(role)
}
