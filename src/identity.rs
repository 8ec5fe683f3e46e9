//! Caller identification for the HTTP adapter.
//!
//! The pipeline never authenticates anyone. It trusts whatever
//! [`IdentityResolver`] the host plugs in to say who is calling.

use std::fmt;
use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::HeaderName;
use axum::http::header::InvalidHeaderName;
use axum::http::request::Parts;

use crate::middleware::ip::{TrustedProxyConfig, extract_client_ip};
use crate::models::Identity;

/// Decides who is making a request.
pub trait IdentityResolver: Send + Sync + fmt::Debug {
    fn resolve(&self, parts: &Parts) -> Identity;
}

/// Reads the user id from a header set by an upstream authenticating proxy,
/// falling back to the client address for anonymous callers.
///
/// The header must be stripped from client traffic by that proxy; anyone
/// who can set it directly can act as any user.
#[derive(Debug, Clone)]
pub struct HeaderIdentityResolver {
    header: HeaderName,
    trusted_proxies: TrustedProxyConfig,
}

impl HeaderIdentityResolver {
    /// # Errors
    ///
    /// Returns an error if `header` is not a valid header name.
    pub fn new(header: &str, trusted_proxies: TrustedProxyConfig) -> Result<Self, InvalidHeaderName> {
        let header = HeaderName::from_bytes(header.trim().to_ascii_lowercase().as_bytes())?;
        Ok(Self {
            header,
            trusted_proxies,
        })
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }
}

impl IdentityResolver for HeaderIdentityResolver {
    fn resolve(&self, parts: &Parts) -> Identity {
        if let Some(value) = parts.headers.get(&self.header)
            && let Ok(user) = value.to_str()
            && !user.trim().is_empty()
        {
            return Identity::User(user.trim().to_string());
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let client = extract_client_ip(&parts.headers, peer, &self.trusted_proxies);
        Identity::anonymous(client)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(builder: axum::http::request::Builder) -> Parts {
        builder.body(()).unwrap().into_parts().0
    }

    fn resolver() -> HeaderIdentityResolver {
        HeaderIdentityResolver::new("X-User-Id", TrustedProxyConfig::default()).unwrap()
    }

    #[test]
    fn test_header_user_is_authenticated() {
        let p = parts(Request::get("/").header("x-user-id", " 42 "));
        assert_eq!(resolver().resolve(&p), Identity::User("42".into()));
    }

    #[test]
    fn test_blank_header_is_anonymous() {
        let p = parts(Request::get("/").header("x-user-id", "").header("x-real-ip", "10.1.1.1"));
        assert_eq!(resolver().resolve(&p), Identity::anonymous("10.1.1.1"));
    }

    #[test]
    fn test_connect_info_fallback() {
        let mut p = parts(Request::get("/"));
        let addr: SocketAddr = "192.0.2.10:4000".parse().unwrap();
        p.extensions.insert(ConnectInfo(addr));
        assert_eq!(resolver().resolve(&p), Identity::anonymous("192.0.2.10"));
    }

    #[test]
    fn test_no_address_is_unknown() {
        let p = parts(Request::get("/"));
        assert_eq!(resolver().resolve(&p), Identity::anonymous("unknown"));
    }

    #[test]
    fn test_invalid_header_name_rejected() {
        assert!(HeaderIdentityResolver::new("bad header", TrustedProxyConfig::default()).is_err());
    }
}
