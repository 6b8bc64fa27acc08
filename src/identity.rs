use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};
use std::convert::Infallible;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use uuid::Uuid;

/// Cookie carrying the per-browser token.
pub const SESSION_COOKIE: &str = "bio_sid";

/// Stand-in for an identity component the request did not provide.
pub const ANONYMOUS: &str = "anonymous";

/// Who is calling: network address plus the browser's token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerIdentity {
    address: String,
    token: String,
}

impl CallerIdentity {
    pub fn new(address: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            address: or_anonymous(address.into()),
            token: or_anonymous(token.into()),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Lookup key in the rate table.
    pub fn key(&self) -> String {
        format!("{}|{}", self.address, self.token)
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.address, self.token)
    }
}

fn or_anonymous(value: String) -> String {
    match value.trim() {
        "" => ANONYMOUS.to_string(),
        trimmed => trimmed.to_string(),
    }
}

/// Caller extracted from an inbound request.
///
/// `issued_token` is set when the request carried no session cookie and a new
/// token was minted; the handler must hand it back with `Set-Cookie`. The
/// identity of such a request uses the [`ANONYMOUS`] token, so clients that
/// drop cookies still share one record per address.
#[derive(Debug, Clone)]
pub struct Caller {
    pub identity: CallerIdentity,
    pub issued_token: Option<String>,
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let address = client_address(&parts.headers, peer).unwrap_or_default();

        // A fresh token only counts from the next request on; until the
        // browser sends it back the caller is keyed on the sentinel.
        let (token, issued_token) = match session_token(&parts.headers) {
            Some(token) => (token, None),
            None => (ANONYMOUS.to_string(), Some(Uuid::new_v4().to_string())),
        };

        Ok(Caller {
            identity: CallerIdentity::new(address, token),
            issued_token,
        })
    }
}

/// Client address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the peer socket.
pub fn client_address(headers: &HeaderMap, peer: Option<IpAddr>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        })
        .or_else(|| peer.map(|ip| ip.to_string()))
}

/// Reads the session token out of any `Cookie` header.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// `Set-Cookie` value for a freshly issued token, living as long as one rate window.
pub fn session_cookie(token: &str, max_age: Duration) -> String {
    format!(
        "{SESSION_COOKIE}={token}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax",
        max_age.as_secs()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn forwarded_for_wins_over_peer() {
        let h = headers(&[("x-forwarded-for", "203.0.113.7, 10.0.0.1")]);
        let peer = Some("127.0.0.1".parse().unwrap());
        assert_eq!(client_address(&h, peer).as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn real_ip_then_peer() {
        let h = headers(&[("x-real-ip", "198.51.100.2")]);
        assert_eq!(client_address(&h, None).as_deref(), Some("198.51.100.2"));

        let peer = Some("192.0.2.9".parse().unwrap());
        assert_eq!(client_address(&HeaderMap::new(), peer).as_deref(), Some("192.0.2.9"));
        assert_eq!(client_address(&HeaderMap::new(), None), None);
    }

    #[test]
    fn empty_components_fall_back_to_sentinel() {
        let id = CallerIdentity::new("", "  ");
        assert_eq!(id.address(), ANONYMOUS);
        assert_eq!(id.token(), ANONYMOUS);
        assert_eq!(id.key(), "anonymous|anonymous");

        let id = CallerIdentity::new(" 10.1.1.1 ", "abc");
        assert_eq!(id.key(), "10.1.1.1|abc");
    }

    #[test]
    fn session_token_is_found_among_other_cookies() {
        let h = headers(&[("cookie", "theme=dark; bio_sid=tok-123; lang=en")]);
        assert_eq!(session_token(&h).as_deref(), Some("tok-123"));

        let h = headers(&[("cookie", "theme=dark"), ("cookie", "bio_sid=second")]);
        assert_eq!(session_token(&h).as_deref(), Some("second"));

        let h = headers(&[("cookie", "bio_sid=")]);
        assert_eq!(session_token(&h), None);
    }

    #[test]
    fn cookie_lives_for_one_window() {
        let cookie = session_cookie("tok", Duration::from_secs(86_400));
        assert_eq!(cookie, "bio_sid=tok; Max-Age=86400; Path=/; HttpOnly; SameSite=Lax");
    }

    #[tokio::test]
    async fn extractor_issues_token_when_cookie_missing() {
        let (mut parts, _) = axum::http::Request::builder()
            .header("x-forwarded-for", "203.0.113.7")
            .body(())
            .unwrap()
            .into_parts();
        let caller = Caller::from_request_parts(&mut parts, &()).await.unwrap();
        let token = caller.issued_token.expect("token issued");
        assert!(!token.is_empty());
        assert_eq!(caller.identity.key(), "203.0.113.7|anonymous");
    }

    #[tokio::test]
    async fn cookieless_requests_share_one_identity() {
        let mut keys = Vec::new();
        for _ in 0..2 {
            let (mut parts, _) = axum::http::Request::builder()
                .header("x-forwarded-for", "203.0.113.7")
                .body(())
                .unwrap()
                .into_parts();
            let caller = Caller::from_request_parts(&mut parts, &()).await.unwrap();
            keys.push(caller.identity.key());
        }
        assert_eq!(keys[0], keys[1]);
    }

    #[tokio::test]
    async fn extractor_reuses_cookie_token() {
        let (mut parts, _) = axum::http::Request::builder()
            .header("cookie", "bio_sid=known")
            .body(())
            .unwrap()
            .into_parts();
        let caller = Caller::from_request_parts(&mut parts, &()).await.unwrap();
        assert!(caller.issued_token.is_none());
        assert_eq!(caller.identity.key(), "anonymous|known");
    }
}
