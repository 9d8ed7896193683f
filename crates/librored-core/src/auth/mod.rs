//! Credentials, session state and token renewal.

pub mod authenticator;
pub mod client;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod session;
pub mod store;

pub use authenticator::RequestAuthenticator;
pub use client::{AuthClient, RefreshGrant};
pub use coordinator::RefreshCoordinator;
pub use error::{ApiError, AuthFailure, DecodeFailure, RefreshFailure, TransportFailure};
pub use identity::Identity;
pub use session::{AuthSession, SessionSnapshot, SessionSubscription};
pub use store::{Credential, TokenStore};
