//! Best-effort identity hint decoded from an access token.
//!
//! The payload is read WITHOUT signature verification. The result is meant for
//! display (who is logged in, whether to show admin screens) and must never be
//! used as an authorization decision; the backend enforces permissions.

use std::collections::BTreeSet;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::DecodeFailure;

/// Who the access token claims to belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

impl Identity {
    /// Decodes the payload segment of a JWT without verifying it.
    ///
    /// Any malformed claim rejects the whole token; a partially populated
    /// identity is never returned.
    ///
    /// # Errors
    /// Returns `DecodeFailure` describing the first problem found.
    pub fn decode_unverified(token: &str) -> Result<Self, DecodeFailure> {
        let mut segments = token.split('.');
        let (Some(_header), Some(payload), Some(_signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(DecodeFailure::Malformed);
        };

        let Ok(bytes) = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')) else {
            return Err(DecodeFailure::Base64);
        };
        let Ok(Value::Object(claims)) = serde_json::from_slice::<Value>(&bytes) else {
            return Err(DecodeFailure::NotAnObject);
        };

        Self::from_claims(&claims)
    }

    fn from_claims(claims: &Map<String, Value>) -> Result<Self, DecodeFailure> {
        let username = match claims.get("sub") {
            Some(Value::String(sub)) if !sub.trim().is_empty() => sub.clone(),
            _ => return Err(DecodeFailure::Claim("sub")),
        };

        let email = match claims.get("email") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(email)) => email.clone(),
            Some(_) => return Err(DecodeFailure::Claim("email")),
        };

        let id = match claims.get("id").or_else(|| claims.get("userId")) {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(DecodeFailure::Claim("id")),
        };

        let roles = match claims.get("roles") {
            None | Some(Value::Null) => BTreeSet::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(role_name)
                .collect::<Option<BTreeSet<_>>>()
                .ok_or(DecodeFailure::Claim("roles"))?,
            Some(_) => return Err(DecodeFailure::Claim("roles")),
        };

        Ok(Self {
            id,
            username,
            email,
            roles,
        })
    }

    /// UI hint: whether admin screens should be offered.
    pub fn is_admin_hint(&self) -> bool {
        self.roles.iter().any(|role| role.contains("ADMIN"))
    }
}

/// Spring Security serializes authorities either as plain strings or as
/// `{"authority": "ROLE_X"}` objects.
fn role_name(value: &Value) -> Option<String> {
    match value {
        Value::String(role) => Some(role.clone()),
        Value::Object(obj) => obj
            .get("authority")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}
