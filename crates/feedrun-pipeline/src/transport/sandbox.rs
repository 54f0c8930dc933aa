//! Network sandbox: refuses requests to loopback, private and other
//! non-public addresses.

use crate::error::TransportError;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::redirect::Policy;
use reqwest::Url;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use thiserror::Error;
use tracing::warn;

const MAX_REDIRECTS: usize = 10;

/// Raised from inside reqwest (resolver, redirect policy) and recovered
/// from the error chain.
#[derive(Debug, Error)]
#[error("Access to restricted address '{0}' is not allowed")]
pub(crate) struct RestrictedAddressError(pub String);

/// Whether connections to this address are refused by the sandbox.
pub fn is_restricted_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_restricted_v4(v4),
        IpAddr::V6(v6) => is_restricted_v6(v6),
    }
}

fn is_restricted_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // 0.0.0.0/8
        || a == 0
        // carrier-grade NAT, 100.64.0.0/10
        || (a == 100 && (b & 0xc0) == 64)
}

fn is_restricted_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_restricted_v4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // unique local, fc00::/7
        || (first & 0xfe00) == 0xfc00
        // link local, fe80::/10
        || (first & 0xffc0) == 0xfe80
}

/// The host of `url` when it is an IP literal.
pub(crate) fn literal_ip(url: &Url) -> Option<IpAddr> {
    let host = url.host_str()?;
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .ok()
}

/// Refuse URLs whose host is a restricted IP literal. Hostnames are
/// checked at resolution time by [`SandboxResolver`].
pub(crate) fn check_url(url: &Url) -> Result<(), TransportError> {
    match literal_ip(url) {
        Some(ip) if is_restricted_ip(ip) => {
            warn!(url = %url, "Refusing request to restricted address");
            Err(TransportError::RestrictedAddress(ip.to_string()))
        }
        _ => Ok(()),
    }
}

/// DNS resolver that drops restricted addresses from lookups.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SandboxResolver;

impl Resolve for SandboxResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let host = name.as_str().to_owned();
        Box::pin(async move {
            let resolved = tokio::net::lookup_host((host.as_str(), 0)).await?;
            let allowed: Vec<SocketAddr> = resolved
                .filter(|addr| !is_restricted_ip(addr.ip()))
                .collect();
            if allowed.is_empty() {
                warn!(host = %host, "Host resolves only to restricted addresses");
                let err: Box<dyn std::error::Error + Send + Sync> =
                    Box::new(RestrictedAddressError(host));
                return Err(err);
            }
            let addrs: Addrs = Box::new(allowed.into_iter());
            Ok(addrs)
        })
    }
}

/// Redirect policy that refuses hops to restricted IP literals.
pub(crate) fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        match literal_ip(attempt.url()) {
            Some(ip) if is_restricted_ip(ip) => {
                attempt.error(RestrictedAddressError(ip.to_string()))
            }
            _ => attempt.follow(),
        }
    })
}

/// Find a sandbox refusal in a reqwest error's source chain.
pub(crate) fn restricted_cause(err: &reqwest::Error) -> Option<String> {
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if let Some(restricted) = cause.downcast_ref::<RestrictedAddressError>() {
            return Some(restricted.0.clone());
        }
        source = cause.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_restricted_v4() {
        for addr in [
            "127.0.0.1",
            "10.1.2.3",
            "172.16.0.1",
            "192.168.1.1",
            "169.254.169.254",
            "0.0.0.0",
            "100.64.0.1",
            "100.127.255.255",
        ] {
            assert!(is_restricted_ip(ip(addr)), "{addr} should be restricted");
        }
        for addr in ["8.8.8.8", "100.128.0.1", "172.32.0.1", "1.1.1.1"] {
            assert!(!is_restricted_ip(ip(addr)), "{addr} should be allowed");
        }
    }

    #[test]
    fn test_restricted_v6() {
        for addr in ["::1", "::", "fd00::1", "fe80::1", "::ffff:127.0.0.1"] {
            assert!(is_restricted_ip(ip(addr)), "{addr} should be restricted");
        }
        assert!(!is_restricted_ip(ip("2606:4700:4700::1111")));
        assert!(!is_restricted_ip(ip("::ffff:8.8.8.8")));
    }

    #[test]
    fn test_check_url_literals() {
        let url = Url::parse("http://127.0.0.1:8080/x").unwrap();
        assert_eq!(
            check_url(&url),
            Err(TransportError::RestrictedAddress("127.0.0.1".into()))
        );
        let url = Url::parse("http://[::1]/").unwrap();
        assert!(check_url(&url).is_err());
        let url = Url::parse("https://example.com/").unwrap();
        assert!(check_url(&url).is_ok());
    }
}
