//! Client IP resolution.
//!
//! Behind a trusted proxy: `CF-Connecting-IP` -> rightmost `X-Forwarded-For`
//! -> socket peer. Otherwise the socket peer only, since clients can send
//! any header they like.

use axum::extract::ConnectInfo;
use http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

/// Resolve the caller's address, if any source provides one.
pub fn resolve(
    headers: &HeaderMap,
    extensions: &http::Extensions,
    trust_proxy: bool,
) -> Option<IpAddr> {
    if trust_proxy {
        if let Some(ip) = forwarded(headers) {
            return Some(ip);
        }
    }

    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

fn forwarded(headers: &HeaderMap) -> Option<IpAddr> {
    header_str(headers, "cf-connecting-ip")
        .and_then(|s| s.trim().parse().ok())
        .or_else(|| {
            // The edge proxy appends the address it saw, so only the last hop is trusted.
            header_str(headers, "x-forwarded-for")
                .and_then(|xff| xff.rsplit(',').next())
                .map(str::trim)
                .and_then(|s| s.parse().ok())
        })
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, value.parse().unwrap());
        }
        map
    }

    #[test]
    fn cloudflare_header_wins() {
        let map = headers(&[
            ("cf-connecting-ip", "203.0.113.7"),
            ("x-forwarded-for", "10.0.0.1"),
        ]);
        let ip = resolve(&map, &http::Extensions::new(), true);
        assert_eq!(ip, Some("203.0.113.7".parse().unwrap()));
    }

    #[test]
    fn rightmost_forwarded_for() {
        let map = headers(&[("x-forwarded-for", "1.1.1.1, 198.51.100.4")]);
        let ip = resolve(&map, &http::Extensions::new(), true);
        assert_eq!(ip, Some("198.51.100.4".parse().unwrap()));
    }

    #[test]
    fn falls_back_to_peer_address() {
        let mut ext = http::Extensions::new();
        ext.insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));
        let ip = resolve(&HeaderMap::new(), &ext, true);
        assert_eq!(ip, Some("127.0.0.1".parse().unwrap()));
        assert_eq!(
            resolve(&HeaderMap::new(), &http::Extensions::new(), true),
            None
        );
    }

    #[test]
    fn spoofed_headers_ignored_without_trusted_proxy() {
        let map = headers(&[
            ("cf-connecting-ip", "203.0.113.7"),
            ("x-forwarded-for", "198.51.100.4"),
        ]);
        let mut ext = http::Extensions::new();
        ext.insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000))));
        assert_eq!(
            resolve(&map, &ext, false),
            Some("192.0.2.1".parse().unwrap())
        );
        assert_eq!(resolve(&map, &http::Extensions::new(), false), None);
    }
}
