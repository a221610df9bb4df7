//! Resolving the requesting instance's address.
//!
//! `GET /metadata` and `GET /userdata` identify the caller by IP. By default
//! only the TCP peer address is used. X-Forwarded-For / X-Real-IP are read
//! only when the peer is a configured trusted proxy; otherwise any client
//! could read another instance's metadata by forging a header.

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{HeaderMap, Request};
use ipnet::IpNet;
use std::net::{IpAddr, SocketAddr};

/// A parsed trusted proxy entry (either an IP or CIDR range).
#[derive(Clone, Debug)]
pub enum TrustedEntry {
    Ip(IpAddr),
    Cidr(IpNet),
}

/// Which peers may supply the client address through forwarded headers.
#[derive(Clone, Debug, Default)]
pub enum TrustedProxies {
    /// Never trust forwarded headers.
    #[default]
    None,
    /// Trust headers from all sources (development only).
    All,
    /// Trust headers only from specific IPs/CIDRs.
    List(Vec<TrustedEntry>),
}

impl TrustedProxies {
    pub fn from_config(proxies: &[String]) -> Self {
        if proxies.is_empty() {
            return Self::None;
        }
        if proxies.len() == 1 && proxies[0] == "*" {
            tracing::warn!("trusted_proxies = [\"*\"]: forwarded headers are trusted from any peer");
            return Self::All;
        }

        let entries = proxies
            .iter()
            .filter_map(|p| {
                if p.contains('/') {
                    match p.parse::<IpNet>() {
                        Ok(net) => Some(TrustedEntry::Cidr(net)),
                        Err(e) => {
                            tracing::warn!("Invalid CIDR in trusted_proxies: '{}': {}", p, e);
                            None
                        }
                    }
                } else {
                    match p.parse::<IpAddr>() {
                        Ok(ip) => Some(TrustedEntry::Ip(ip)),
                        Err(e) => {
                            tracing::warn!("Invalid IP in trusted_proxies: '{}': {}", p, e);
                            None
                        }
                    }
                }
            })
            .collect();
        Self::List(entries)
    }

    /// Check if the given peer is a trusted proxy.
    pub fn is_trusted(&self, peer: IpAddr) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::List(entries) => entries.iter().any(|entry| match entry {
                TrustedEntry::Ip(trusted) => *trusted == peer,
                TrustedEntry::Cidr(network) => network.contains(&peer),
            }),
        }
    }
}

/// First address in X-Forwarded-For, falling back to X-Real-IP.
fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for")
        && let Ok(s) = forwarded.to_str()
        && let Some(ip) = s.split(',').next()
        && !ip.trim().is_empty()
    {
        return Some(ip.trim().to_string());
    }

    if let Some(real_ip) = headers.get("x-real-ip")
        && let Ok(s) = real_ip.to_str()
        && !s.trim().is_empty()
    {
        return Some(s.trim().to_string());
    }

    None
}

/// Peer address from request extensions (set by ConnectInfo, or by
/// MockConnectInfo in tests).
fn peer_ip(req: &Request<Body>) -> Option<IpAddr> {
    let extensions = req.extensions();
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0)
        .or_else(|| {
            extensions
                .get::<MockConnectInfo<SocketAddr>>()
                .map(|mock| mock.0)
        })
        .map(|addr| addr.ip().to_canonical())
}

/// Resolve the client address for a lookup request.
///
/// Returns `None` when the router was served without connect info and no
/// trusted forwarded header applies.
pub fn client_ip(req: &Request<Body>, proxies: &TrustedProxies) -> Option<String> {
    let peer = peer_ip(req);

    let trust_headers = match (peer, proxies) {
        (Some(peer), proxies) => proxies.is_trusted(peer),
        // No peer to verify against; only the wildcard config trusts blindly.
        (None, TrustedProxies::All) => true,
        (None, _) => false,
    };

    if trust_headers && let Some(ip) = forwarded_ip(req.headers()) {
        return Some(ip);
    }

    peer.map(|ip| ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(peer: Option<&str>, headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().uri("/metadata");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut req = builder.body(Body::empty()).unwrap();
        if let Some(peer) = peer {
            let addr: SocketAddr = peer.parse().unwrap();
            req.extensions_mut().insert(ConnectInfo(addr));
        }
        req
    }

    #[test]
    fn test_trusted_proxies_none() {
        let proxies = TrustedProxies::from_config(&[]);
        assert!(!proxies.is_trusted("127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_trusted_proxies_list() {
        let proxies =
            TrustedProxies::from_config(&["127.0.0.1".to_string(), "10.0.0.0/8".to_string()]);
        assert!(proxies.is_trusted("127.0.0.1".parse().unwrap()));
        assert!(proxies.is_trusted("10.255.255.255".parse().unwrap()));
        assert!(!proxies.is_trusted("192.168.1.1".parse().unwrap()));
    }

    #[test]
    fn test_untrusted_peer_ignores_forwarded_header() {
        let req = request(Some("192.0.2.10:5000"), &[("x-forwarded-for", "10.0.0.1")]);
        assert_eq!(
            client_ip(&req, &TrustedProxies::None).as_deref(),
            Some("192.0.2.10")
        );
    }

    #[test]
    fn test_trusted_peer_uses_first_forwarded_address() {
        let proxies = TrustedProxies::from_config(&["192.0.2.0/24".to_string()]);
        let req = request(
            Some("192.0.2.10:5000"),
            &[("x-forwarded-for", "10.0.0.1, 192.0.2.10")],
        );
        assert_eq!(client_ip(&req, &proxies).as_deref(), Some("10.0.0.1"));

        let req = request(Some("192.0.2.10:5000"), &[("x-real-ip", "10.0.0.2")]);
        assert_eq!(client_ip(&req, &proxies).as_deref(), Some("10.0.0.2"));
    }

    #[test]
    fn test_ipv4_mapped_peer_is_unmapped() {
        let req = request(Some("[::ffff:10.1.2.3]:5000"), &[]);
        assert_eq!(
            client_ip(&req, &TrustedProxies::None).as_deref(),
            Some("10.1.2.3")
        );
    }

    #[test]
    fn test_missing_connect_info() {
        let req = request(None, &[("x-forwarded-for", "10.0.0.1")]);
        assert_eq!(client_ip(&req, &TrustedProxies::None), None);
        assert_eq!(
            client_ip(&req, &TrustedProxies::All).as_deref(),
            Some("10.0.0.1")
        );
    }
}
