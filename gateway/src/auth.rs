//! Authentication boundary (spec §6.5): identity is accepted pre-verified, carried as
//! `X-User-Id`/`X-Username` headers on REST requests and as `userId`/`username` query
//! parameters on the WebSocket upgrade handshake. No signature, JWT, or password verification
//! happens here — that is an external collaborator's responsibility per §1.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use serde::Deserialize;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("missing authentication")]
    Missing,
    #[error("invalid authentication: {0}")]
    Invalid(String),
}

impl axum::response::IntoResponse for AuthError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AuthError::Missing => StatusCode::UNAUTHORIZED,
            AuthError::Invalid(_) => StatusCode::BAD_REQUEST,
        };
        (status, self.to_string()).into_response()
    }
}

/// The pre-verified identity attached to a REST request via `X-User-Id`/`X-Username` headers.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("X-User-Id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(AuthError::Missing)?;
        let username = parts
            .headers
            .get("X-Username")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| user_id.clone());
        if user_id.trim().is_empty() {
            return Err(AuthError::Invalid("X-User-Id must not be empty".to_string()));
        }
        Ok(Identity { user_id, username })
    }
}

/// The WebSocket upgrade handshake's identity, carried as query parameters since browsers
/// cannot set custom headers on a WS upgrade request.
#[derive(Debug, Clone, Deserialize)]
pub struct SocketHandshake {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "username")]
    pub username: Option<String>,
}

impl SocketHandshake {
    pub fn resolved_username(&self) -> String {
        self.username.clone().unwrap_or_else(|| self.user_id.clone())
    }
}
