//! Single network attempt: build, authorize, send.

use reqwest::StatusCode;

use super::request::ApiRequest;
use crate::auth::authenticator::{Authorized, RequestAuthenticator};
use crate::auth::error::{ApiError, TransportFailure};

/// Result of one attempt, with the bearer token it carried (if any).
#[derive(Debug)]
pub(crate) struct Attempt {
    pub response: reqwest::Response,
    pub bearer: Option<String>,
    pub url: url::Url,
}

impl Attempt {
    pub fn is_unauthorized(&self) -> bool {
        self.response.status() == StatusCode::UNAUTHORIZED
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Dispatcher {
    http: reqwest::Client,
    base_url: url::Url,
    authenticator: RequestAuthenticator,
}

impl Dispatcher {
    pub fn new(http: reqwest::Client, base_url: url::Url, authenticator: RequestAuthenticator) -> Self {
        Self {
            http,
            base_url,
            authenticator,
        }
    }

    /// Sends `call` once, with whatever credential is stored right now.
    pub async fn send(&self, call: &ApiRequest) -> Result<Attempt, ApiError> {
        let url = call.url(&self.base_url)?;

        let mut builder = self.http.request(call.method.clone(), url.clone());
        if !call.query.is_empty() {
            builder = builder.query(&call.query);
        }
        if let Some(body) = &call.body {
            builder = builder.json(body);
        }

        let Authorized { request, bearer } = self.authenticator.authorize(builder);
        let response = request
            .send()
            .await
            .map_err(|e| TransportFailure::from_reqwest(&e))?;

        tracing::debug!(
            method = %call.method,
            path = url.path(),
            status = response.status().as_u16(),
            authenticated = bearer.is_some(),
            "API request"
        );

        Ok(Attempt {
            response,
            bearer,
            url,
        })
    }
}
