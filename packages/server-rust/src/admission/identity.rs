//! Client identity derivation for admission control.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;

/// Identity used when nothing about the caller is known.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Derives the admission identity for a request.
///
/// Precedence: the first public address in `X-Forwarded-For`, then
/// `X-Real-IP`, then the peer socket's IP. Private, loopback, link-local and
/// unparseable `X-Forwarded-For` entries are skipped, as are blank or
/// non-UTF-8 header values.
#[must_use]
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.split(',')
                .filter_map(|hop| hop.trim().parse::<IpAddr>().ok())
                .find(|ip| !is_private(ip))
        });
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.map_or_else(|| UNKNOWN_CLIENT.to_string(), |addr| addr.ip().to_string())
}

/// Addresses that only identify a hop inside someone's network.
fn is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            // fc00::/7 unique local, fe80::/10 link local
            v6.is_loopback() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    }
}
