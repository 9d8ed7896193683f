//! Token and session helpers for integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Value, json};

/// Unsigned JWT whose payload is `claims`.
pub fn jwt_with(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}

/// Token for `sub`; `version` keeps successive tokens distinct.
pub fn jwt(sub: &str, version: u32) -> String {
    jwt_with(&json!({
        "sub": sub,
        "email": format!("{sub}@example.com"),
        "roles": ["ROLE_USER"],
        "ver": version,
    }))
}

/// Writes a session file as a previous login would have.
pub fn write_session(home: &Path, access_token: &str, refresh_token: &str) {
    fs::write(
        home.join("session.json"),
        json!({ "access_token": access_token, "refresh_token": refresh_token }).to_string(),
    )
    .unwrap();
}

pub fn read_session(home: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(home.join("session.json")).unwrap()).unwrap()
}
