//! Authenticated API client: the request pipeline.
//!
//! Every call passes through the `RequestAuthenticator`, goes to the network,
//! and comes back directly unless the server answers 401. A 401 on a call that
//! carried a token is handed to the `RefreshCoordinator`, which refreshes once
//! for all concurrent callers and replays them.

pub(crate) mod dispatch;
pub mod request;

use std::sync::Arc;

use anyhow::{Context, Result};
pub use request::ApiRequest;

use crate::auth::authenticator::RequestAuthenticator;
use crate::auth::client::AuthClient;
use crate::auth::coordinator::RefreshCoordinator;
use crate::auth::error::{ApiError, AuthFailure, RefreshFailure};
use crate::auth::session::{AuthSession, SessionSnapshot};
use crate::config::Config;
use dispatch::Dispatcher;

#[derive(Debug, Clone)]
pub struct ApiClient {
    session: Arc<AuthSession>,
    auth: AuthClient,
    dispatcher: Dispatcher,
    coordinator: Arc<RefreshCoordinator>,
    base_url: url::Url,
}

impl ApiClient {
    /// Builds the pipeline for `session` using the configured base URL and
    /// timeouts.
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid or the HTTP client cannot
    /// be created.
    pub fn new(config: &Config, session: Arc<AuthSession>) -> Result<Self> {
        let base_url = config.effective_base_url()?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().context("Failed to build HTTP client")?;

        let auth = AuthClient::new(http.clone(), base_url.clone());
        let dispatcher = Dispatcher::new(
            http,
            base_url.clone(),
            RequestAuthenticator::new(Arc::clone(&session)),
        );
        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::clone(&session),
            auth.clone(),
            dispatcher.clone(),
            config.refresh_timeout(),
            config.max_concurrent_replays(),
        ));

        Ok(Self {
            session,
            auth,
            dispatcher,
            coordinator,
            base_url,
        })
    }

    pub fn session(&self) -> &Arc<AuthSession> {
        &self.session
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn base_url(&self) -> &url::Url {
        &self.base_url
    }

    /// Logs in and stores the issued credential.
    ///
    /// # Errors
    /// Returns the `AuthFailure` from the identity service, or `Storage` if
    /// the credential could not be persisted.
    pub async fn login(&self, username: &str, password: &str) -> Result<SessionSnapshot, AuthFailure> {
        let credential = self.auth.login(username, password).await?;
        let snapshot = self
            .session
            .establish_blocking(credential)
            .await
            .map_err(|e| AuthFailure::Storage(format!("{e:#}")))?;

        tracing::info!(
            username = snapshot.identity.as_ref().map(|i| i.username.as_str()),
            "Logged in"
        );
        Ok(snapshot)
    }

    /// Creates an account. The session is left untouched.
    ///
    /// # Errors
    /// Returns the `AuthFailure` from the identity service.
    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<String, AuthFailure> {
        self.auth.register(username, email, password).await
    }

    /// Clears the local session, then notifies the server.
    ///
    /// Returns whether a session existed. A failed server notification is
    /// logged and otherwise ignored.
    ///
    /// # Errors
    /// Returns an error if the token store could not be cleared on disk.
    pub async fn logout(&self) -> Result<bool> {
        let had_session = self.session.credential().is_some();
        let cleared = self.session.teardown_blocking().await;

        if let Err(e) = self.auth.logout().await {
            tracing::warn!(error = %e, "Server logout failed; local session cleared anyway");
        }

        cleared.context("Failed to clear session")?;
        tracing::info!(had_session, "Logged out");
        Ok(had_session)
    }

    /// Sends a call through the pipeline.
    ///
    /// Any status other than 401 is returned as a response, untouched.
    ///
    /// # Errors
    /// - `Unauthenticated`: 401 and no credential was attached
    /// - `Unauthorized`: 401 again after a successful refresh
    /// - `RefreshFailure`: the session could not be renewed and was cleared
    /// - `Transport`: the request never got a response
    pub async fn send(&self, request: ApiRequest) -> Result<reqwest::Response, ApiError> {
        let attempt = self.dispatcher.send(&request).await?;
        if !attempt.is_unauthorized() {
            return Ok(attempt.response);
        }

        if self.auth.is_refresh_url(&attempt.url) {
            // Never refresh to recover the refresh call itself
            let failure = RefreshFailure::Rejected {
                status: 401,
                message: None,
            };
            self.coordinator.end_session(&failure).await;
            return Err(failure.into());
        }

        let Some(stale_token) = attempt.bearer else {
            return Err(ApiError::Unauthenticated);
        };

        tracing::debug!(path = attempt.url.path(), "Access token rejected; recovering");
        self.coordinator.recover(request, &stale_token).await
    }
}
