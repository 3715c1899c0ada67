//! Hostname classifier that keeps the relay away from local and private networks.
//!
//! The check is purely textual and runs against the hostname of the
//! requested URL only. It does not cover IPv6 loopback, link-local or
//! unique-local literals, and it does not re-check hosts reached through
//! upstream redirects.

/// Returns `true` when the relay must refuse to contact `host`.
///
/// Missing or empty hosts are refused.
pub fn is_blocked(host: Option<&str>) -> bool {
    let Some(host) = host.filter(|h| !h.is_empty()) else {
        return true;
    };
    let host = host.to_ascii_lowercase();

    host == "localhost"
        || host.starts_with("127.")
        || host.starts_with("10.")
        || host.starts_with("192.168.")
        || host.starts_with("0.")
        || host.ends_with(".local")
        || is_private_172(&host)
}

/// 172.16.0.0/12, matched on the second dotted label.
fn is_private_172(host: &str) -> bool {
    let Some(rest) = host.strip_prefix("172.") else {
        return false;
    };
    rest.split('.')
        .next()
        .and_then(|octet| octet.parse::<u8>().ok())
        .is_some_and(|octet| (16..=31).contains(&octet))
}
