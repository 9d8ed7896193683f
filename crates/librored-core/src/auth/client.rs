//! HTTP client for the identity service (`<base>/auth/*`).
//!
//! Stateless: it never reads or writes the token store and never attaches the
//! pipeline's bearer header. Every operation resolves to a result value.

use serde::{Deserialize, Serialize};

use super::error::{AuthFailure, RefreshFailure, TransportFailure};
use super::store::Credential;

const LOGIN_PATH: &str = "auth/login";
const REGISTER_PATH: &str = "auth/register";
const REFRESH_PATH: &str = "auth/refresh";
const LOGOUT_PATH: &str = "auth/logout";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum AuthStatus {
    Success,
    Failure,
}

/// Body shared by every `/auth/*` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    status: AuthStatus,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl AuthResponse {
    fn describe(&self, fallback: &str) -> String {
        self.message
            .as_deref()
            .or(self.error.as_deref())
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(fallback)
            .to_string()
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    username: &'a str,
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Tokens returned by a successful refresh.
///
/// `refresh_token` is `None` when the service keeps the old one.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl RefreshGrant {
    /// Builds the next credential, keeping `previous`'s refresh token unless
    /// this grant rotated it.
    pub fn into_credential(self, previous: &Credential) -> Credential {
        Credential {
            access_token: self.access_token,
            refresh_token: self
                .refresh_token
                .filter(|token| !token.is_empty())
                .unwrap_or_else(|| previous.refresh_token.clone()),
        }
    }
}

impl std::fmt::Debug for RefreshGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshGrant")
            .field("rotated", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct AuthClient {
    http: reqwest::Client,
    base_url: url::Url,
}

impl AuthClient {
    /// `base_url` is the API root; endpoints are resolved under `auth/`.
    pub fn new(http: reqwest::Client, base_url: url::Url) -> Self {
        Self { http, base_url }
    }

    /// Absolute URL of an identity endpoint.
    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.as_str().trim_end_matches('/'))
    }

    /// True if `url` targets the refresh endpoint.
    pub fn is_refresh_url(&self, url: &url::Url) -> bool {
        url.path().trim_end_matches('/').ends_with(&format!("/{REFRESH_PATH}"))
    }

    /// Exchanges username/password for a credential.
    ///
    /// # Errors
    /// `Rejected` for refused credentials, `Transport` for network failures,
    /// `InvalidResponse` when a success carries no access token.
    pub async fn login(&self, username: &str, password: &str) -> Result<Credential, AuthFailure> {
        let (status, body) = self
            .post(LOGIN_PATH, &LoginRequest { username, password })
            .await?;

        let body = match body {
            Some(body) if status.is_success() && body.status == AuthStatus::Success => body,
            Some(body) => {
                return Err(AuthFailure::Rejected {
                    status: status.as_u16(),
                    message: body.describe("Login failed"),
                });
            }
            None if status.is_success() => {
                return Err(AuthFailure::InvalidResponse(
                    "login response is not JSON".to_string(),
                ));
            }
            None => {
                return Err(AuthFailure::Rejected {
                    status: status.as_u16(),
                    message: "Login failed".to_string(),
                });
            }
        };

        let access_token = body
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                AuthFailure::InvalidResponse("login succeeded without an access token".to_string())
            })?;

        Ok(Credential::new(
            access_token,
            body.refresh_token.unwrap_or_default(),
        ))
    }

    /// Creates an account. Returns the service's confirmation message.
    ///
    /// # Errors
    /// `Rejected` when the service refuses (e.g. duplicate user), `Transport`
    /// for network failures.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<String, AuthFailure> {
        let (status, body) = self
            .post(
                REGISTER_PATH,
                &RegisterRequest {
                    username,
                    email,
                    password,
                },
            )
            .await?;

        match body {
            Some(body) if status.is_success() && body.status == AuthStatus::Success => {
                Ok(body.describe("User registered successfully"))
            }
            Some(body) => Err(AuthFailure::Rejected {
                status: status.as_u16(),
                message: body.describe("Registration failed"),
            }),
            None => Err(AuthFailure::Rejected {
                status: status.as_u16(),
                message: "Registration failed".to_string(),
            }),
        }
    }

    /// Exchanges a refresh token for a new access token.
    ///
    /// # Errors
    /// `Rejected` for any non-success status (401 included), `Denied` for a
    /// `FAILURE` body or a success without access token, `Transport` for
    /// network failures.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshGrant, RefreshFailure> {
        if refresh_token.is_empty() {
            return Err(RefreshFailure::MissingRefreshToken);
        }

        let (status, body) = self
            .post(REFRESH_PATH, &RefreshRequest { refresh_token })
            .await
            .map_err(RefreshFailure::Transport)?;

        if !status.is_success() {
            return Err(RefreshFailure::Rejected {
                status: status.as_u16(),
                message: body.map(|b| b.describe("Token refresh failed")),
            });
        }

        let Some(body) = body else {
            return Err(RefreshFailure::Denied(
                "refresh response is not JSON".to_string(),
            ));
        };
        if body.status != AuthStatus::Success {
            return Err(RefreshFailure::Denied(body.describe("Token refresh failed")));
        }

        match body.access_token.filter(|token| !token.is_empty()) {
            Some(access_token) => Ok(RefreshGrant {
                access_token,
                refresh_token: body.refresh_token.filter(|token| !token.is_empty()),
            }),
            None => Err(RefreshFailure::Denied(
                "refresh succeeded without an access token".to_string(),
            )),
        }
    }

    /// Notifies the service of a logout. Best effort.
    ///
    /// # Errors
    /// Returns the transport failure or a rejection; callers log and move on.
    pub async fn logout(&self) -> Result<(), AuthFailure> {
        let (status, _) = self.post(LOGOUT_PATH, &serde_json::json!({})).await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(AuthFailure::Rejected {
                status: status.as_u16(),
                message: "Logout failed".to_string(),
            })
        }
    }

    /// Posts JSON and returns the status with the body, if it parsed.
    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(reqwest::StatusCode, Option<AuthResponse>), TransportFailure> {
        let url = self.endpoint(path);
        tracing::debug!(%url, "Identity service request");

        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportFailure::from_reqwest(&e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TransportFailure::from_reqwest(&e))?;

        Ok((status, serde_json::from_str(&text).ok()))
    }
}
