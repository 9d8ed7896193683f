//! Single-flight token refresh.
//!
//! Calls that meet a 401 are parked as `PendingCall`s behind one refresh. The
//! first one starts the refresh and becomes the head of the queue; calls that
//! arrive while it is outstanding join the queue. When the refresh settles the
//! queue is drained in enqueue order: replayed with the new token on success,
//! failed with the same `RefreshFailure` otherwise.
//!
//! The queue lives in a `RefreshFlight` owned by the `AuthSession`, so every
//! `ApiClient` built over one session shares it. The refresh and the drain run
//! on their own task, so a caller that gives up waiting cannot strand the calls
//! queued behind it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream;
use tokio::sync::{Mutex, oneshot};

use super::client::AuthClient;
use super::error::{ApiError, RefreshFailure};
use super::session::AuthSession;
use super::store::Credential;
use crate::api::dispatch::Dispatcher;
use crate::api::request::ApiRequest;

type CallResult = Result<reqwest::Response, ApiError>;

/// A suspended call waiting for the in-flight refresh.
///
/// Carries the dispatcher of the client that issued it, so a replay goes out
/// through that client even when another client led the refresh.
struct PendingCall {
    request: ApiRequest,
    dispatcher: Dispatcher,
    reply: oneshot::Sender<CallResult>,
}

enum State {
    Idle,
    Refreshing(VecDeque<PendingCall>),
}

/// The last refresh that ended the session, and the access token it was
/// meant to replace.
struct Failed {
    retired_token: Option<String>,
    failure: RefreshFailure,
}

struct Flight {
    state: State,
    last_failure: Option<Failed>,
}

/// Refresh state shared by every coordinator over one session.
pub(crate) struct RefreshFlight {
    inner: Mutex<Flight>,
    attempts: AtomicU64,
}

impl Default for RefreshFlight {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Flight {
                state: State::Idle,
                last_failure: None,
            }),
            attempts: AtomicU64::new(0),
        }
    }
}

impl std::fmt::Debug for RefreshFlight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshFlight")
            .field("attempts", &self.attempts.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// What a call does after inspecting the shared flight.
enum Role {
    /// Started the refresh; the queue head.
    Leader,
    /// Queued behind an outstanding refresh.
    Waiter,
    /// Its token was already replaced; replay immediately.
    Replay(ApiRequest),
    /// The session is already gone; nothing to refresh.
    Settled(ApiError),
}

pub struct RefreshCoordinator {
    session: Arc<AuthSession>,
    auth: AuthClient,
    dispatcher: Dispatcher,
    refresh_timeout: Duration,
    max_concurrent_replays: usize,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refresh_timeout", &self.refresh_timeout)
            .field("max_concurrent_replays", &self.max_concurrent_replays)
            .field("refresh_attempts", &self.refresh_attempts())
            .finish_non_exhaustive()
    }
}

impl RefreshCoordinator {
    pub(crate) fn new(
        session: Arc<AuthSession>,
        auth: AuthClient,
        dispatcher: Dispatcher,
        refresh_timeout: Duration,
        max_concurrent_replays: usize,
    ) -> Self {
        Self {
            session,
            auth,
            dispatcher,
            refresh_timeout,
            max_concurrent_replays: max_concurrent_replays.max(1),
        }
    }

    fn flight(&self) -> &RefreshFlight {
        self.session.refresh_flight()
    }

    /// Number of refreshes started for this session, by any client.
    pub fn refresh_attempts(&self) -> u64 {
        self.flight().attempts.load(Ordering::SeqCst)
    }

    /// Whether a refresh is outstanding right now.
    pub async fn is_refreshing(&self) -> bool {
        matches!(
            self.flight().inner.lock().await.state,
            State::Refreshing(_)
        )
    }

    /// Recovers a call that got a 401 while carrying `stale_token`.
    ///
    /// Resolves with the replayed call's own outcome, or with the refresh
    /// failure that ended the session.
    pub(crate) async fn recover(self: &Arc<Self>, request: ApiRequest, stale_token: &str) -> CallResult {
        let (reply, outcome) = oneshot::channel();
        let call = PendingCall {
            request,
            dispatcher: self.dispatcher.clone(),
            reply,
        };

        let role = {
            let mut flight = self.flight().inner.lock().await;
            if let State::Refreshing(queue) = &mut flight.state {
                queue.push_back(call);
                tracing::debug!(queued = queue.len(), "Waiting for in-flight token refresh");
                Role::Waiter
            } else {
                match self.session.access_token() {
                    Some(current) if current != stale_token => Role::Replay(call.request),
                    Some(_) => {
                        flight.state = State::Refreshing(VecDeque::from([call]));
                        self.flight().attempts.fetch_add(1, Ordering::SeqCst);
                        Role::Leader
                    }
                    None => Role::Settled(Self::settled_error(flight.last_failure.as_ref(), stale_token)),
                }
            }
        };

        match role {
            Role::Replay(request) => {
                tracing::debug!("Token already refreshed; replaying without a new refresh");
                return replay(&self.dispatcher, &request).await;
            }
            Role::Settled(error) => {
                tracing::debug!("Session already ended; not refreshing");
                return Err(error);
            }
            Role::Leader => {
                let this = Arc::clone(self);
                tokio::spawn(async move { this.drive().await });
            }
            Role::Waiter => {}
        }

        outcome
            .await
            .unwrap_or(Err(ApiError::RefreshFailure(RefreshFailure::Abandoned)))
    }

    /// Outcome for a late 401 that finds the store empty.
    ///
    /// If the token was retired by a failed refresh, the caller gets that
    /// failure; otherwise the session was logged out.
    fn settled_error(last_failure: Option<&Failed>, stale_token: &str) -> ApiError {
        last_failure
            .filter(|failed| failed.retired_token.as_deref() == Some(stale_token))
            .map_or(ApiError::Unauthenticated, |failed| {
                ApiError::RefreshFailure(failed.failure.clone())
            })
    }

    /// Runs the refresh, then settles every queued call.
    async fn drive(self: Arc<Self>) {
        let previous = self.session.credential();
        let refreshed = self.refresh(previous.as_ref()).await;

        // Credential is already stored (or cleared) at this point, so calls
        // that reach the lock after this see the outcome through the session.
        let pending = {
            let mut flight = self.flight().inner.lock().await;
            flight.last_failure = refreshed.as_ref().err().map(|failure| Failed {
                retired_token: previous.as_ref().map(|c| c.access_token.clone()),
                failure: failure.clone(),
            });
            match std::mem::replace(&mut flight.state, State::Idle) {
                State::Refreshing(queue) => queue,
                State::Idle => VecDeque::new(),
            }
        };

        match refreshed {
            Ok(()) => {
                tracing::info!(queued = pending.len(), "Access token refreshed");
                self.drain(pending).await;
            }
            Err(failure) => {
                // In enqueue order, like the success path
                for call in pending {
                    // Receiver may be gone if the caller stopped waiting
                    let _ = call
                        .reply
                        .send(Err(ApiError::RefreshFailure(failure.clone())));
                }
            }
        }
    }

    /// Replays queued calls with bounded concurrency, resolving them strictly
    /// in enqueue order.
    async fn drain(&self, pending: VecDeque<PendingCall>) {
        let mut replays = stream::iter(pending)
            .map(|call| async move {
                let result = replay(&call.dispatcher, &call.request).await;
                (call.reply, result)
            })
            .buffered(self.max_concurrent_replays);

        while let Some((reply, result)) = replays.next().await {
            let _ = reply.send(result);
        }
    }

    /// Calls the refresh endpoint with a bounded timeout and applies the
    /// outcome to the session.
    async fn refresh(&self, previous: Option<&Credential>) -> Result<(), RefreshFailure> {
        let result = match previous {
            None => Err(RefreshFailure::MissingRefreshToken),
            Some(previous) => {
                let attempt = tokio::time::timeout(
                    self.refresh_timeout,
                    self.auth.refresh(&previous.refresh_token),
                )
                .await;

                match attempt {
                    Err(_elapsed) => Err(RefreshFailure::TimedOut(self.refresh_timeout)),
                    Ok(Err(failure)) => Err(failure),
                    Ok(Ok(grant)) => self
                        .session
                        .establish_blocking(grant.into_credential(previous))
                        .await
                        .map(|_| ())
                        .map_err(|e| RefreshFailure::Storage(format!("{e:#}"))),
                }
            }
        };

        if let Err(failure) = &result {
            self.end_session(failure).await;
        }
        result
    }

    /// Tears the session down after an unrecoverable refresh failure.
    pub(crate) async fn end_session(&self, failure: &RefreshFailure) {
        tracing::warn!(error = %failure, "Token refresh failed; clearing session");
        if let Err(e) = self.session.teardown_blocking().await {
            tracing::warn!(error = %format!("{e:#}"), "Failed to clear token store");
        }
    }
}

/// Re-issues a call with the current credential. A second 401 is final.
async fn replay(dispatcher: &Dispatcher, request: &ApiRequest) -> CallResult {
    let attempt = dispatcher.send(request).await?;
    if attempt.is_unauthorized() {
        tracing::warn!(path = attempt.url.path(), "Request rejected after token refresh");
        return Err(ApiError::Unauthorized);
    }
    Ok(attempt.response)
}
