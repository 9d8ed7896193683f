//! Pipeline stage that attaches the stored bearer token to outgoing requests.

use std::sync::Arc;

use super::session::AuthSession;

/// Request with credentials attached, plus the token that was used.
///
/// The token is kept so a later 401 can be matched against the token that
/// was actually sent.
#[derive(Debug)]
pub struct Authorized {
    pub request: reqwest::RequestBuilder,
    pub bearer: Option<String>,
}

/// Read-only view of the session: never refreshes, never writes.
#[derive(Debug, Clone)]
pub struct RequestAuthenticator {
    session: Arc<AuthSession>,
}

impl RequestAuthenticator {
    pub fn new(session: Arc<AuthSession>) -> Self {
        Self { session }
    }

    /// Adds `Authorization: Bearer <access token>` when a credential is stored.
    /// Without one the request passes through unmodified.
    pub fn authorize(&self, request: reqwest::RequestBuilder) -> Authorized {
        match self.session.access_token() {
            Some(token) => Authorized {
                request: request.bearer_auth(&token),
                bearer: Some(token),
            },
            None => Authorized {
                request,
                bearer: None,
            },
        }
    }
}
