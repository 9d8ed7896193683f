//! `request` command: one call through the authenticated pipeline.

use anyhow::{Context, Result};
use librored_core::api::{ApiClient, ApiRequest};
use librored_core::auth::ApiError;
use reqwest::Method;

pub struct RequestOptions<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub data: Option<&'a str>,
    pub query: Vec<(String, String)>,
}

/// Parses a `key=value` query argument.
pub fn parse_query_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

pub async fn run(client: &ApiClient, options: RequestOptions<'_>) -> Result<()> {
    let method = Method::from_bytes(options.method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method '{}'", options.method))?;

    let mut request = ApiRequest::new(method, options.path);
    for (key, value) in options.query {
        request = request.query(key, value);
    }
    if let Some(data) = options.data {
        let body: serde_json::Value =
            serde_json::from_str(data).context("--data is not valid JSON")?;
        request = request.json_value(body);
    }

    let response = match client.send(request).await {
        Ok(response) => response,
        Err(e) => return Err(explain(e)),
    };

    let status = response.status();
    let body = response.text().await.context("read response body")?;

    println!("HTTP {}", status.as_u16());
    if !body.is_empty() {
        println!("{}", pretty_body(&body));
    }

    if !status.is_success() {
        anyhow::bail!("Request failed with HTTP {status}");
    }
    Ok(())
}

/// Adds a hint for errors the user can act on.
fn explain(e: ApiError) -> anyhow::Error {
    let hint = match &e {
        ApiError::Unauthenticated => Some("Not logged in. Run `librored login` first."),
        ApiError::RefreshFailure(_) => Some("Session expired. Run `librored login` again."),
        _ => None,
    };
    match hint {
        Some(hint) => anyhow::Error::new(e).context(hint),
        None => e.into(),
    }
}

/// Pretty-prints JSON bodies; anything else is returned as-is.
fn pretty_body(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| serde_json::to_string_pretty(&value).ok())
        .unwrap_or_else(|| body.to_string())
}
