//! Bearer token extraction.
//!
//! The token is an opaque owner key: every row is stored under the key of
//! the caller that pushed it. Verifying the token is left to whatever sits
//! in front of the server.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};

use crate::config::Config;
use crate::AppState;

/// Owner key used for requests without a token.
pub const ANONYMOUS: &str = "anonymous";

/// Authenticated caller extracted from request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    /// Owner key of the caller's rows
    pub owner: String,
}

impl AuthUser {
    /// Resolve the caller from an `Authorization` header value.
    pub fn from_header(
        header: Option<&str>,
        config: &Config,
    ) -> Result<Self, (StatusCode, &'static str)> {
        match header {
            Some(header) => {
                let Some(token) = header.strip_prefix("Bearer ") else {
                    return Err((
                        StatusCode::UNAUTHORIZED,
                        "Invalid authorization header format",
                    ));
                };
                let token = token.trim();
                if token.is_empty() {
                    return Err((StatusCode::UNAUTHORIZED, "Empty bearer token"));
                }
                Ok(AuthUser {
                    owner: token.to_string(),
                })
            }
            None if config.allows_anonymous() => Ok(AuthUser {
                owner: ANONYMOUS.to_string(),
            }),
            None => Err((StatusCode::UNAUTHORIZED, "Missing authorization header")),
        }
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        AuthUser::from_header(header, &state.config)
    }
}
