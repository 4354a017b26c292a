//! HTTP Basic authorization gate.
//!
//! Every request must carry `Authorization: Basic <base64(user:secret)>`
//! matching the credential table. Failures are answered with 401 and a
//! `WWW-Authenticate` challenge before any WebDAV handling happens.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::{self, HeaderValue};
use http::{HeaderMap, StatusCode};
use thiserror::Error;

use crate::users::Credentials;

/// Errors produced while authenticating a request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing Authorization header")]
    MissingHeader,

    #[error("malformed Basic credentials")]
    Malformed,

    #[error("invalid credentials for user {0}")]
    InvalidCredentials(String),
}

/// Username that passed the gate, attached to the request as an extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

impl AuthenticatedUser {
    pub fn name(&self) -> &str {
        &self.0
    }
}

/// Decode the `user:secret` pair of a Basic `Authorization` header value.
pub fn parse_basic(value: &str) -> Result<(String, String), AuthError> {
    let (scheme, encoded) = value.trim().split_once(' ').ok_or(AuthError::Malformed)?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(AuthError::Malformed);
    }

    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| AuthError::Malformed)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AuthError::Malformed)?;

    let (user, secret) = decoded.split_once(':').ok_or(AuthError::Malformed)?;
    Ok((user.to_string(), secret.to_string()))
}

/// Credential table plus the challenge sent on failure.
#[derive(Debug)]
pub struct AuthGate {
    credentials: Credentials,
    challenge: HeaderValue,
}

impl AuthGate {
    pub fn new(credentials: Credentials, realm: &str) -> Self {
        let challenge = HeaderValue::from_str(&format!("Basic realm=\"{}\"", realm))
            .unwrap_or_else(|_| HeaderValue::from_static("Basic realm=\"Restricted\""));
        Self {
            credentials,
            challenge,
        }
    }

    /// The `WWW-Authenticate` value sent with every 401.
    pub fn challenge(&self) -> &HeaderValue {
        &self.challenge
    }

    /// Return the authenticated username for a request's headers.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<String, AuthError> {
        let value = headers
            .get(header::AUTHORIZATION)
            .ok_or(AuthError::MissingHeader)?
            .to_str()
            .map_err(|_| AuthError::Malformed)?;

        let (user, secret) = parse_basic(value)?;
        if self.credentials.verify(&user, &secret) {
            Ok(user)
        } else {
            Err(AuthError::InvalidCredentials(user))
        }
    }

    /// 401 response carrying the challenge.
    pub fn unauthorized(&self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, self.challenge.clone())],
            Body::from("Unauthorized"),
        )
            .into_response()
    }
}

/// Middleware rejecting requests without valid Basic credentials.
pub async fn require_basic_auth(
    State(gate): State<Arc<AuthGate>>,
    mut request: Request,
    next: Next,
) -> Response {
    match gate.authenticate(request.headers()) {
        Ok(user) => {
            request.extensions_mut().insert(AuthenticatedUser(user));
            next.run(request).await
        }
        Err(e) => {
            tracing::debug!(
                "{} {}: authentication failed: {}",
                request.method(),
                request.uri().path(),
                e
            );
            gate.unauthorized()
        }
    }
}
