//! Parsing and rewriting of worker connection endpoints.
//!
//! Workers advertise endpoints of the form `scheme://host:port/path`. The
//! publisher and the status service only ever rewrite the `host:port`
//! authority component; the scheme and path always survive untouched.

/// Borrowed view of an endpoint split into its components.
#[derive(Debug, PartialEq, Eq)]
pub struct EndpointParts<'a> {
    pub scheme: &'a str,
    pub host: &'a str,
    pub port: Option<u16>,
    /// Everything after the authority, leading `/` included. Empty when the
    /// endpoint has no path.
    pub path: &'a str,
}

/// Split `scheme://host[:port][/path]` into parts. Returns `None` for
/// anything that does not look like a URI with an authority.
pub fn split_endpoint(endpoint: &str) -> Option<EndpointParts<'_>> {
    let (scheme, rest) = endpoint.split_once("://")?;
    if scheme.is_empty() {
        return None;
    }

    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    if authority.is_empty() {
        return None;
    }

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port_str)) => (host, Some(port_str.parse::<u16>().ok()?)),
        None => (authority, None),
    };
    if host.is_empty() {
        return None;
    }

    Some(EndpointParts {
        scheme,
        host,
        port,
        path,
    })
}

/// Port component of an endpoint, if present.
pub fn endpoint_port(endpoint: &str) -> Option<u16> {
    split_endpoint(endpoint).and_then(|p| p.port)
}

/// Replace only the port of an endpoint, keeping host and path.
pub fn with_port(endpoint: &str, port: u16) -> Option<String> {
    let parts = split_endpoint(endpoint)?;
    Some(format!(
        "{}://{}:{}{}",
        parts.scheme, parts.host, port, parts.path
    ))
}

/// Rewrite the authority for an externally advertised listing.
///
/// `advertise` is either a bare host (original port kept) or a `host:port`
/// pair (both replaced). The path is preserved in both forms.
pub fn rewrite_advertised(endpoint: &str, advertise: &str) -> Option<String> {
    let parts = split_endpoint(endpoint)?;

    let (host, port) = match advertise.rsplit_once(':') {
        Some((h, p)) => match p.parse::<u16>() {
            Ok(port) => (h, Some(port)),
            // "example.com:notaport" is treated as a bare host
            Err(_) => (advertise, parts.port),
        },
        None => (advertise, parts.port),
    };

    match port {
        Some(port) => Some(format!("{}://{}:{}{}", parts.scheme, host, port, parts.path)),
        None => Some(format!("{}://{}{}", parts.scheme, host, parts.path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_endpoint() {
        let parts = split_endpoint("ws://127.0.0.1:54321/abc").unwrap();
        assert_eq!(parts.scheme, "ws");
        assert_eq!(parts.host, "127.0.0.1");
        assert_eq!(parts.port, Some(54321));
        assert_eq!(parts.path, "/abc");
    }

    #[test]
    fn test_split_endpoint_no_path() {
        let parts = split_endpoint("ws://localhost:3000").unwrap();
        assert_eq!(parts.host, "localhost");
        assert_eq!(parts.port, Some(3000));
        assert_eq!(parts.path, "");
    }

    #[test]
    fn test_split_endpoint_no_port() {
        let parts = split_endpoint("wss://example.com/browser").unwrap();
        assert_eq!(parts.host, "example.com");
        assert_eq!(parts.port, None);
        assert_eq!(parts.path, "/browser");
    }

    #[test]
    fn test_split_endpoint_rejects_garbage() {
        assert!(split_endpoint("not a uri").is_none());
        assert!(split_endpoint("ws://").is_none());
        assert!(split_endpoint("://host:1/p").is_none());
        assert!(split_endpoint("ws://host:badport/p").is_none());
    }

    #[test]
    fn test_with_port() {
        assert_eq!(
            with_port("ws://127.0.0.1:54321/abc", 3001).as_deref(),
            Some("ws://127.0.0.1:3001/abc")
        );
    }

    #[test]
    fn test_rewrite_advertised_bare_host() {
        assert_eq!(
            rewrite_advertised("ws://localhost:3001/s1", "example.com").as_deref(),
            Some("ws://example.com:3001/s1")
        );
    }

    #[test]
    fn test_rewrite_advertised_host_and_port() {
        assert_eq!(
            rewrite_advertised("ws://localhost:3001/s1", "example.com:9000").as_deref(),
            Some("ws://example.com:9000/s1")
        );
    }

    #[test]
    fn test_rewrite_advertised_preserves_deep_path() {
        assert_eq!(
            rewrite_advertised("wss://127.0.0.1:40123/browser/slot-2", "pool.internal").as_deref(),
            Some("wss://pool.internal:40123/browser/slot-2")
        );
    }
}
