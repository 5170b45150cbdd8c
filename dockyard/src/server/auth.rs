//! Request authentication

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::authn::principal::Principal;
use crate::errors::PlatformError;
use crate::server::errors::ApiError;
use crate::server::state::ServerState;

/// Caller identified by an `Authorization: Bearer` header
#[derive(Debug, Clone)]
pub struct Authenticated(pub Principal);

impl FromRequestParts<Arc<ServerState>> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ServerState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(missing_token)?;
        let principal = state.resolver.resolve(&token).await?;
        Ok(Authenticated(principal))
    }
}

/// Like [`Authenticated`], but also accepts `?token=` since browser
/// `EventSource` cannot set headers
#[derive(Debug, Clone)]
pub struct StreamAuthenticated(pub Principal);

impl FromRequestParts<Arc<ServerState>> for StreamAuthenticated {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ServerState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .or_else(|| query_token(parts))
            .ok_or_else(missing_token)?;
        let principal = state.resolver.resolve(&token).await?;
        Ok(StreamAuthenticated(principal))
    }
}

fn missing_token() -> ApiError {
    ApiError(PlatformError::Unauthorized(
        "missing bearer token".to_string(),
    ))
}

fn bearer_token(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn query_token(parts: &Parts) -> Option<String> {
    let query = parts.uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.into_owned())
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(request: Request<()>) -> Parts {
        request.into_parts().0
    }

    #[test]
    fn test_bearer_token() {
        let p = parts(
            Request::builder()
                .header(AUTHORIZATION, "Bearer abc.def")
                .body(())
                .unwrap(),
        );
        assert_eq!(bearer_token(&p).as_deref(), Some("abc.def"));

        let p = parts(
            Request::builder()
                .header(AUTHORIZATION, "Basic dXNlcg==")
                .body(())
                .unwrap(),
        );
        assert!(bearer_token(&p).is_none());
    }

    #[test]
    fn test_query_token() {
        let p = parts(
            Request::builder()
                .uri("/deployments/d-1/logs/stream?token=abc%2Edef")
                .body(())
                .unwrap(),
        );
        assert_eq!(query_token(&p).as_deref(), Some("abc.def"));
    }
}
