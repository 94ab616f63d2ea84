//! Effective root domain
//!
//! The cookie domain attribute that lets every subdomain of a site share one
//! session.

use std::net::IpAddr;

/// Last two dot-separated labels of `hostname`.
///
/// Bare hostnames, `localhost` and IP addresses are returned unchanged.
/// Multi-label public suffixes (`co.uk`) are not special-cased.
pub fn root_domain(hostname: &str) -> String {
    let host = hostname.trim().trim_end_matches('.').to_ascii_lowercase();

    if host == "localhost" || !host.contains('.') || is_ip_literal(&host) {
        return host;
    }

    let labels: Vec<&str> = host.split('.').collect();
    labels[labels.len() - 2..].join(".")
}

fn is_ip_literal(host: &str) -> bool {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subdomain_reduced_to_root() {
        assert_eq!(root_domain("shop.example.com"), "example.com");
        assert_eq!(root_domain("a.b.c.example.org"), "example.org");
        assert_eq!(root_domain("example.com"), "example.com");
        assert_eq!(root_domain("WWW.Example.COM."), "example.com");
    }

    #[test]
    fn test_verbatim_hosts() {
        assert_eq!(root_domain("localhost"), "localhost");
        assert_eq!(root_domain("intranet"), "intranet");
        assert_eq!(root_domain("192.168.1.20"), "192.168.1.20");
        assert_eq!(root_domain("::1"), "::1");
        assert_eq!(root_domain("[::1]"), "[::1]");
    }
}
