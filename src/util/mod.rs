use std::net::IpAddr;

use systemstat::{Platform, System};

/// Pick an IPv4 address that can be shared with a remote ICE peer.
///
/// Iterates over all network interfaces provided by `systemstat`, skipping any
/// loopback, link-local or broadcast addresses. The first routable interface is
/// returned as an [`IpAddr`], or `None` if the host has none.
pub fn select_host_address() -> Option<IpAddr> {
    let system = System::new();
    let networks = system.networks().ok()?;

    for net in networks.values() {
        for n in &net.addrs {
            if let systemstat::IpAddr::V4(v) = n.addr {
                if !v.is_loopback() && !v.is_link_local() && !v.is_broadcast() {
                    return Some(IpAddr::V4(v));
                }
            }
        }
    }

    None
}

/// Address field of an SDP candidate attribute, with or without the `a=`
/// prefix: `candidate:<foundation> <component> <proto> <priority> <address> ...`
fn candidate_address(candidate: &str) -> Option<&str> {
    let candidate = candidate.strip_prefix("a=").unwrap_or(candidate);
    candidate.split_whitespace().nth(4)
}

/// Whether a local candidate should be signaled to the client.
///
/// Empty candidates never are. IPv6 addresses only when `allow_ipv6` is set.
/// Host names (mDNS) are passed through.
pub fn candidate_allowed(candidate: &str, allow_ipv6: bool) -> bool {
    let Some(address) = candidate_address(candidate) else {
        return false;
    };
    match address.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => allow_ipv6,
        Ok(IpAddr::V4(_)) | Err(_) => true,
    }
}
