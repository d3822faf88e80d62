// HTTP middleware

use axum::{
    extract::{ConnectInfo, FromRef, FromRequestParts, Request},
    http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use reelforge_core::models::SessionId;
use std::convert::Infallible;
use std::net::SocketAddr;

use super::AppState;

/// Header carrying the browser session id
pub const SESSION_HEADER: &str = "x-session-id";

static PERMISSIONS_POLICY: HeaderName = HeaderName::from_static("permissions-policy");

/// Identities a request is rate limited under
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    /// Network address, or "unknown" when no socket address is available
    pub ip: String,
    pub session: Option<SessionId>,
}

impl ClientIdentity {
    /// Prefer a session id given in the body or query over the header.
    #[must_use]
    pub fn with_session(mut self, session: Option<&str>) -> Self {
        if let Some(session) = session.map(str::trim).filter(|s| !s.is_empty()) {
            self.session = Some(SessionId::from(session));
        }
        self
    }

    #[must_use]
    pub fn session_str(&self) -> Option<&str> {
        self.session.as_ref().map(SessionId::as_str)
    }
}

impl<S> FromRequestParts<S> for ClientIdentity
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let remote_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string());

        let ip = client_ip(
            &parts.headers,
            remote_addr,
            app_state.config.server.trust_forwarded_headers,
        );
        let session = parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(SessionId::from);

        Ok(Self { ip, session })
    }
}

/// Resolve the caller's address.
///
/// X-Forwarded-For / X-Real-IP are only honoured when configured, since any
/// client can set them and would otherwise pick its own rate limit identity.
fn client_ip(headers: &HeaderMap, remote_addr: Option<String>, trust_forwarded: bool) -> String {
    if trust_forwarded {
        let forwarded = headers
            .get("X-Forwarded-For")
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
        if let Some(ip) = headers.get("X-Real-IP").and_then(|h| h.to_str().ok()) {
            return ip.trim().to_string();
        }
    }
    remote_addr.unwrap_or_else(|| "unknown".to_string())
}

/// Security headers middleware
///
/// Adds the usual hardening headers unless a handler already set them.
/// Cache-Control is left alone for responses that carry their own.
pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    let defaults = [
        (header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY")),
        (header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
        (header::X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block")),
        (
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'; base-uri 'none'"),
        ),
        (
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ),
        (
            PERMISSIONS_POLICY.clone(),
            HeaderValue::from_static("camera=(), geolocation=(), microphone=(), payment=(), usb=()"),
        ),
        (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
    ];

    for (name, value) in defaults {
        if !headers.contains_key(&name) {
            headers.insert(name, value);
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn test_forwarded_headers_ignored_by_default() {
        let h = headers(&[("X-Forwarded-For", "1.2.3.4")]);
        assert_eq!(client_ip(&h, Some("10.0.0.1".to_string()), false), "10.0.0.1");
        assert_eq!(client_ip(&h, None, false), "unknown");
    }

    #[test]
    fn test_forwarded_headers_when_trusted() {
        let h = headers(&[("X-Forwarded-For", "1.2.3.4, 10.0.0.2")]);
        assert_eq!(client_ip(&h, Some("10.0.0.1".to_string()), true), "1.2.3.4");

        let h = headers(&[("X-Real-IP", "5.6.7.8")]);
        assert_eq!(client_ip(&h, Some("10.0.0.1".to_string()), true), "5.6.7.8");
    }

    #[test]
    fn test_body_session_overrides_header() {
        let identity = ClientIdentity {
            ip: "10.0.0.1".to_string(),
            session: Some(SessionId::from("header")),
        };
        assert_eq!(identity.clone().with_session(Some("body")).session_str(), Some("body"));
        assert_eq!(identity.with_session(Some("  ")).session_str(), Some("header"));
    }
}
