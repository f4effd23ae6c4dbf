//! Resolves the identity carried by a connection handshake.
//!
//! The session token travels as the `token` cookie. The upgrade URL's
//! `?token=` query parameter is accepted as a fallback for clients that
//! cannot set cookies on a WebSocket handshake.

use axum::http::{header, HeaderMap};

use crate::auth::jwt::TokenVerifier;
use crate::auth::Identity;
use crate::error::AuthFailure;

pub const TOKEN_COOKIE: &str = "token";

/// Find the session token among all `Cookie` headers.
pub fn token_from_cookies(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == TOKEN_COOKIE)
        .map(|(_, value)| value.trim())
}

/// Token from an `Authorization: Bearer` header.
pub fn token_from_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Bind a handshake to an identity.
///
/// The cookie wins over the query parameter. An empty token counts as
/// missing. Verification itself is delegated to `verifier`.
pub async fn bind_identity(
    verifier: &dyn TokenVerifier,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<Identity, AuthFailure> {
    let token = token_from_cookies(headers)
        .or(query_token)
        .filter(|t| !t.is_empty())
        .ok_or(AuthFailure::MissingToken)?;
    verifier.verify(token).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_cookie(cookie: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(cookie).unwrap());
        headers
    }

    #[test]
    fn test_token_found_after_other_cookies() {
        let headers = headers_with_cookie("theme=dark; token=abc.def.ghi; lang=en");
        assert_eq!(token_from_cookies(&headers), Some("abc.def.ghi"));
    }

    #[test]
    fn test_similarly_named_cookie_is_not_token() {
        let headers = headers_with_cookie("xtoken=nope; tokens=nope");
        assert_eq!(token_from_cookies(&headers), None);
    }

    #[test]
    fn test_token_in_second_cookie_header() {
        let mut headers = headers_with_cookie("a=1");
        headers.append(header::COOKIE, HeaderValue::from_static("token=xyz"));
        assert_eq!(token_from_cookies(&headers), Some("xyz"));
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer t0k"));
        assert_eq!(token_from_bearer(&headers), Some("t0k"));
    }

    #[tokio::test]
    async fn test_empty_cookie_is_missing_token() {
        let verifier = crate::auth::jwt::JwtVerifier::new(b"secret");
        let headers = headers_with_cookie("token=");
        let err = bind_identity(&verifier, &headers, None).await.unwrap_err();
        assert_eq!(err, AuthFailure::MissingToken);
    }

    #[tokio::test]
    async fn test_no_credentials_is_missing_token() {
        let verifier = crate::auth::jwt::JwtVerifier::new(b"secret");
        let err = bind_identity(&verifier, &HeaderMap::new(), None)
            .await
            .unwrap_err();
        assert_eq!(err, AuthFailure::MissingToken);
    }

    #[tokio::test]
    async fn test_garbage_token_is_invalid() {
        let verifier = crate::auth::jwt::JwtVerifier::new(b"secret");
        let err = bind_identity(&verifier, &HeaderMap::new(), Some("garbage"))
            .await
            .unwrap_err();
        assert_eq!(err, AuthFailure::InvalidToken);
    }
}
