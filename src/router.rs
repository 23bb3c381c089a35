use crate::address::Destination;
use crate::config::ServerConfig;
use crate::header::HandshakeRequest;
use crate::socks5::Socks5Upstream;

/// Transport is the kind of outbound socket a session opens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Stream,
    Datagram,
}

/// Dial says how a stream outbound reaches its destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dial {
    Direct,
    Socks5(Socks5Upstream),
}

/// Route is everything the relay needs to open the outbound leg
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub transport: Transport,
    pub destination: Destination,
    pub dial: Dial,
    /// Destination came from the configured override, not the handshake
    pub overridden: bool,
}

/// route picks the transport and the effective destination for a parsed
/// handshake. No I/O happens here.
pub fn route(request: &HandshakeRequest, config: &ServerConfig) -> Route {
    let transport = if request.is_datagram() {
        Transport::Datagram
    } else {
        Transport::Stream
    };

    let (destination, overridden) = match &config.override_destination {
        Some(fixed) => (fixed.clone(), true),
        None => (Destination::from_address(&request.address, request.port), false),
    };

    // Upstream proxying only applies to streams
    let dial = match (&config.socks5, transport) {
        (Some(upstream), Transport::Stream)
            if config
                .socks5_routes
                .iter()
                .any(|pattern| matches_pattern(pattern, destination.bare_host())) =>
        {
            Dial::Socks5(upstream.clone())
        }
        _ => Dial::Direct,
    };

    Route {
        transport,
        destination,
        dial,
        overridden,
    }
}

/// matches_pattern is a case-insensitive glob where `*` matches any run of
/// characters, including an empty one
pub fn matches_pattern(pattern: &str, host: &str) -> bool {
    let pattern = pattern.trim().to_ascii_lowercase();
    let host = host.to_ascii_lowercase();
    let (pattern, text) = (pattern.as_bytes(), host.as_bytes());

    let (mut p, mut t) = (0, 0);
    // Position of the last star and the text index it is currently absorbing up to
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((star, absorbed)) = backtrack {
            p = star + 1;
            t = absorbed + 1;
            backtrack = Some((star, absorbed + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Credential;
    use crate::header::parse_handshake;
    use crate::header::tests::{UUID, build_handshake};

    fn request(command: u8, domain: &str, port: u16) -> HandshakeRequest {
        let cred: Credential = UUID.parse().unwrap();
        let mut address = vec![domain.len() as u8];
        address.extend_from_slice(domain.as_bytes());
        let frame = build_handshake(&cred, &[], command, port, 2, &address, b"");
        parse_handshake(&frame, &cred).unwrap()
    }

    fn config() -> ServerConfig {
        ServerConfig::new(UUID.parse().unwrap())
    }

    #[test]
    fn uses_handshake_destination_without_override() {
        let route = route(&request(1, "example.com", 80), &config());
        assert_eq!(route.transport, Transport::Stream);
        assert_eq!(route.destination, Destination::new("example.com", 80));
        assert_eq!(route.dial, Dial::Direct);
        assert!(!route.overridden);
    }

    #[test]
    fn override_replaces_address_and_port() {
        let config = config().with_override(Some(Destination::new("172.65.64.251", 443)));

        for (command, transport) in [(1, Transport::Stream), (2, Transport::Datagram)] {
            let route = route(&request(command, "example.com", 80), &config);
            assert_eq!(route.transport, transport);
            assert_eq!(route.destination, Destination::new("172.65.64.251", 443));
            assert!(route.overridden);
        }
    }

    #[test]
    fn socks5_routes_matching_streams_only() {
        let upstream = Socks5Upstream::parse("127.0.0.1:1080").unwrap();
        let config = config().with_socks5(
            Some(upstream.clone()),
            vec!["*.pubg.com".into(), "*.krafton.com".into()],
        );

        let routed = route(&request(1, "api.PUBG.com", 443), &config);
        assert_eq!(routed.dial, Dial::Socks5(upstream));

        let direct = route(&request(1, "example.com", 443), &config);
        assert_eq!(direct.dial, Dial::Direct);

        let datagram = route(&request(2, "game.pubg.com", 7086), &config);
        assert_eq!(datagram.dial, Dial::Direct);
    }

    #[test]
    fn patterns_without_upstream_are_ignored() {
        let config = config().with_socks5(None, vec!["*".into()]);
        let route = route(&request(1, "example.com", 443), &config);
        assert_eq!(route.dial, Dial::Direct);
    }

    #[test]
    fn glob_matching() {
        assert!(matches_pattern("*", "anything.example"));
        assert!(matches_pattern("*.pubg.com", "a.b.pubg.com"));
        assert!(!matches_pattern("*.pubg.com", "pubg.com"));
        assert!(matches_pattern("*ttvnw.net", "video-edge.ttvnw.net"));
        assert!(matches_pattern("exact.host", "EXACT.host"));
        assert!(!matches_pattern("exact.host", "exact.hosts"));
        assert!(matches_pattern("a*b*c", "aXXbYYc"));
        assert!(!matches_pattern("a*b*c", "aXXbYY"));
    }
}
