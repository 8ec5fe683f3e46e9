//! Client address resolution for anonymous callers.
//!
//! The client address is the rate limit key for unauthenticated requests, so
//! it has to be hard to spoof.
//!
//! # Resolution Order
//!
//! 1. `X-Forwarded-For` (first entry) or `X-Real-IP`, when the connecting peer
//!    is a trusted proxy, or when no trusted proxies are configured. With
//!    proxies configured and no known peer, forwarded headers are ignored
//! 2. The connecting peer address (`ConnectInfo`)
//! 3. [`UNKNOWN_IP`]
//!
//! # IP Spoofing
//!
//! With `TRUSTED_PROXIES` empty every forwarded header is believed, which lets
//! a client rotate spoofed addresses to dodge its quota. Configure the CIDR
//! ranges of your reverse proxies in production; forwarded headers from any
//! other peer are then ignored and the peer address is used instead.
//!
//! All callers without an identifiable address share the `"unknown"` key.

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;
use tracing::{debug, warn};

/// Fallback key when no client address can be determined.
pub const UNKNOWN_IP: &str = "unknown";

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range for trusted proxy validation.
#[derive(Debug, Clone)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse a CIDR notation string (e.g., "10.0.0.0/8" or "::1/128").
    ///
    /// A bare address is treated as /32 or /128. Returns `None` if invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();
        let (addr, prefix) = match cidr.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr, None),
        };

        let network: IpAddr = addr.parse().ok()?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix_len = match prefix {
            Some(p) => p.parse().ok().filter(|len| *len <= max_prefix)?,
            None => max_prefix,
        };

        Some(Self {
            network,
            prefix_len,
        })
    }

    /// Check if an IP address is contained within this CIDR range.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX
                    .checked_shl(32 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

/// Set of reverse proxies whose forwarded headers are believed.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Build from CIDR strings. Invalid entries are logged and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy validation enabled");
        }

        Self { ranges }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Whether `ip` may supply forwarded headers.
    ///
    /// Everything is trusted when no ranges are configured.
    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.ranges.is_empty() || self.ranges.iter().any(|range| range.contains(ip))
    }
}

// =============================================================================
// Extraction
// =============================================================================

/// First address from the proxy headers, if any.
fn forwarded_ip(headers: &HeaderMap) -> Option<&str> {
    if let Some(forwarded) = headers.get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first_ip) = value.split(',').next()
        && !first_ip.trim().is_empty()
    {
        return Some(first_ip.trim());
    }

    if let Some(real_ip) = headers.get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
        && !value.trim().is_empty()
    {
        return Some(value.trim());
    }

    None
}

/// Resolve the client address for a request.
///
/// `peer` is the socket address of the connection, when the server was
/// started with connect info.
///
/// Returns `Cow::Borrowed` for [`UNKNOWN_IP`] to avoid allocating.
pub fn extract_client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_proxies: &TrustedProxyConfig,
) -> Cow<'static, str> {
    let forwarded = forwarded_ip(headers);

    match (forwarded, peer) {
        (Some(ip), Some(peer)) if !trusted_proxies.is_trusted(&peer.ip()) => {
            debug!(
                peer = %peer.ip(),
                forwarded = %ip,
                "Ignoring forwarded client address from untrusted peer"
            );
            Cow::Owned(peer.ip().to_string())
        }
        // With proxies configured, forwarded headers need a peer to vouch for them.
        (Some(ip), None) if trusted_proxies.is_enabled() => {
            debug!(forwarded = %ip, "Ignoring forwarded client address without a known peer");
            Cow::Borrowed(UNKNOWN_IP)
        }
        (Some(ip), _) => Cow::Owned(ip.to_string()),
        (None, Some(peer)) => Cow::Owned(peer.ip().to_string()),
        (None, None) => {
            if trusted_proxies.is_enabled() {
                debug!("No proxy headers or peer address - request may be bypassing reverse proxy");
            }
            Cow::Borrowed(UNKNOWN_IP)
        }
    }
}
