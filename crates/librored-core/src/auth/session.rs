//! Session state: an observable projection of the token store.
//!
//! `AuthSession` is the per-process context object shared (by `Arc`) between the
//! pipeline stages. It owns the `TokenStore` and is the only place that writes it,
//! so every credential transition and the snapshot published for it happen
//! under one lock, in one order. It also owns the refresh flight, so every
//! client built over one session shares a single refresh.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use super::coordinator::RefreshFlight;
use super::identity::Identity;
use super::store::{Credential, TokenStore};

/// What subscribers see: whether someone is logged in, and who (unverified).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub logged_in: bool,
    pub identity: Option<Identity>,
}

impl SessionSnapshot {
    /// Projects a credential into a snapshot.
    ///
    /// An access token whose payload cannot be decoded yields a logged-out
    /// snapshot rather than an error.
    pub fn project(credential: Option<&Credential>) -> Self {
        let Some(credential) = credential else {
            return Self::default();
        };

        match Identity::decode_unverified(&credential.access_token) {
            Ok(identity) => Self {
                logged_in: true,
                identity: Some(identity),
            },
            Err(e) => {
                tracing::warn!(error = %e, "Access token payload unreadable; treating session as logged out");
                Self::default()
            }
        }
    }
}

/// Stream of session transitions, starting with the state at subscription time.
#[derive(Debug)]
pub struct SessionSubscription {
    rx: mpsc::UnboundedReceiver<SessionSnapshot>,
}

impl SessionSubscription {
    /// Waits for the next snapshot. `None` once the session is dropped.
    pub async fn next(&mut self) -> Option<SessionSnapshot> {
        self.rx.recv().await
    }

    /// Returns an already-delivered snapshot without waiting.
    pub fn try_next(&mut self) -> Option<SessionSnapshot> {
        self.rx.try_recv().ok()
    }
}

#[derive(Debug)]
struct Published {
    current: SessionSnapshot,
    subscribers: Vec<mpsc::UnboundedSender<SessionSnapshot>>,
}

/// Token store plus the session state derived from it.
#[derive(Debug)]
pub struct AuthSession {
    store: TokenStore,
    published: Mutex<Published>,
    flight: RefreshFlight,
}

impl AuthSession {
    /// Wraps a store, restoring the session it already holds.
    ///
    /// The identity is re-derived from the stored access token; the persisted
    /// identity snapshot is not trusted on its own.
    pub fn new(store: TokenStore) -> Self {
        let current = SessionSnapshot::project(store.get().as_ref());
        if current.logged_in {
            tracing::info!("Restored session from token store");
        }

        Self {
            store,
            published: Mutex::new(Published {
                current,
                subscribers: Vec::new(),
            }),
            flight: RefreshFlight::default(),
        }
    }

    pub(crate) fn store(&self) -> &TokenStore {
        &self.store
    }

    pub(crate) fn refresh_flight(&self) -> &RefreshFlight {
        &self.flight
    }

    pub fn credential(&self) -> Option<Credential> {
        self.store.get()
    }

    pub fn access_token(&self) -> Option<String> {
        self.store.access_token()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().current.clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.lock().current.logged_in
    }

    /// Unverified identity for display purposes only.
    pub fn identity_hint(&self) -> Option<Identity> {
        self.lock().current.identity.clone()
    }

    /// Subscribes to session transitions.
    ///
    /// The current snapshot is delivered first, then every later transition
    /// in the order it happened.
    pub fn subscribe(&self) -> SessionSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut published = self.lock();
        // Receiver is alive; send cannot fail here.
        let _ = tx.send(published.current.clone());
        published.subscribers.push(tx);
        SessionSubscription { rx }
    }

    /// Stores a freshly issued credential and publishes the new snapshot.
    ///
    /// Blocks on file I/O; async callers go through `establish_blocking`.
    ///
    /// # Errors
    /// Returns an error if the credential cannot be persisted; nothing is
    /// published in that case.
    pub(crate) fn establish(&self, credential: &Credential) -> Result<SessionSnapshot> {
        let mut published = self.lock();
        let next = SessionSnapshot::project(Some(credential));
        self.store.set(credential, next.identity.as_ref())?;
        Self::publish(&mut published, next.clone());
        Ok(next)
    }

    /// Clears the store and publishes the logged-out snapshot.
    ///
    /// The logged-out state is published even if removing the file fails.
    /// Tearing down a session that is already gone publishes nothing.
    /// Blocks on file I/O; async callers go through `teardown_blocking`.
    ///
    /// # Errors
    /// Returns the storage error after publishing.
    pub(crate) fn teardown(&self) -> Result<()> {
        let mut published = self.lock();
        let had_session = self.store.get().is_some() || published.current.logged_in;
        let cleared = self.store.clear();
        if had_session {
            Self::publish(&mut published, SessionSnapshot::default());
        }
        cleared
    }

    pub(crate) async fn establish_blocking(self: &Arc<Self>, credential: Credential) -> Result<SessionSnapshot> {
        let session = Arc::clone(self);
        tokio::task::spawn_blocking(move || session.establish(&credential))
            .await
            .context("Session store task failed")?
    }

    pub(crate) async fn teardown_blocking(self: &Arc<Self>) -> Result<()> {
        let session = Arc::clone(self);
        tokio::task::spawn_blocking(move || session.teardown())
            .await
            .context("Session store task failed")?
    }

    fn publish(published: &mut Published, snapshot: SessionSnapshot) {
        published.current = snapshot;
        let current = &published.current;
        published
            .subscribers
            .retain(|tx| tx.send(current.clone()).is_ok());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Published> {
        self.published.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
