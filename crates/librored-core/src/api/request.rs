//! Replayable description of an API call.
//!
//! A `reqwest::Request` with a streaming body cannot be cloned, and a call that
//! meets a 401 has to be re-issued with a new token, so the pipeline works on
//! this owned description and builds a fresh request for every attempt.

use reqwest::Method;
use serde::Serialize;

use crate::auth::error::ApiError;

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base URL, e.g. `books/3` or `/loans`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn json_value(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Serializes `body` as the JSON payload.
    ///
    /// # Errors
    /// Returns the serialization error.
    pub fn json<T: Serialize + ?Sized>(self, body: &T) -> Result<Self, serde_json::Error> {
        Ok(self.json_value(serde_json::to_value(body)?))
    }

    /// Resolves the path against `base` (which has no trailing slash).
    ///
    /// # Errors
    /// `ApiError::InvalidRequest` if the joined URL does not parse.
    pub fn url(&self, base: &url::Url) -> Result<url::Url, ApiError> {
        let joined = format!(
            "{}/{}",
            base.as_str().trim_end_matches('/'),
            self.path.trim_start_matches('/')
        );
        url::Url::parse(&joined).map_err(|e| ApiError::InvalidRequest(format!("{joined}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_with_single_slash() {
        let base = url::Url::parse("http://localhost:8443/api").unwrap();

        assert_eq!(
            ApiRequest::get("/books/3").url(&base).unwrap().as_str(),
            "http://localhost:8443/api/books/3"
        );
        assert_eq!(
            ApiRequest::get("loans").url(&base).unwrap().as_str(),
            "http://localhost:8443/api/loans"
        );
    }

    #[test]
    fn test_builder_collects_query_and_body() {
        let request = ApiRequest::post("books")
            .query("page", "2")
            .json(&serde_json::json!({ "title": "Dune" }))
            .unwrap();

        assert_eq!(request.method, Method::POST);
        assert_eq!(request.query, vec![("page".to_string(), "2".to_string())]);
        assert_eq!(request.body.unwrap()["title"], "Dune");
    }
}
