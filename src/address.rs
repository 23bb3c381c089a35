use crate::protocol::AddressType;
use anyhow::{Result, anyhow, bail};
use std::fmt;

/// Port used when a configured endpoint omits one
pub const DEFAULT_PORT: u16 = 443;

/// Address represents a destination decoded from a handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    IPv4([u8; 4]),
    /// Raw name bytes as sent by the client, only decoded for display and dialing
    DomainName(Vec<u8>),
    IPv6([u8; 16]),
}

/// Address implementation block
impl Address {
    /// address_type returns the kind this address was decoded from
    pub fn address_type(&self) -> AddressType {
        match self {
            Address::IPv4(_) => AddressType::IPv4,
            Address::DomainName(_) => AddressType::DomainName,
            Address::IPv6(_) => AddressType::IPv6,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::IPv4([a, b, c, d]) => write!(f, "{a}.{b}.{c}.{d}"),
            Address::DomainName(name) => f.write_str(&String::from_utf8_lossy(name)),
            Address::IPv6(octets) => f.write_str(&format_ipv6_groups(octets)),
        }
    }
}

/// format_ipv6_groups renders 16 bytes as eight bracketed, colon-joined
/// lowercase hex groups. Zero runs are written out in full, clients
/// compare against this exact text.
pub fn format_ipv6_groups(octets: &[u8; 16]) -> String {
    let groups: Vec<String> = octets
        .chunks_exact(2)
        .map(|pair| format!("{:x}", u16::from_be_bytes([pair[0], pair[1]])))
        .collect();

    format!("[{}]", groups.join(":"))
}

/// parse_address decodes the address of kind `atyp` starting at `start_offset`
/// and returns it along with the number of bytes consumed
pub fn parse_address(data: &[u8], start_offset: usize, atyp: u8) -> Result<(Address, usize)> {
    // Set offset to maintain start
    let mut offset = start_offset;

    let address = match AddressType::from_byte(atyp) {
        Some(AddressType::IPv4) => parse_ipv4_address(data, &mut offset)?,
        Some(AddressType::DomainName) => parse_domain_address(data, &mut offset)?,
        Some(AddressType::IPv6) => parse_ipv6_address(data, &mut offset)?,
        None => bail!("unknown address kind: {atyp}"),
    };

    Ok((address, offset - start_offset))
}

/// parse_ipv4_address parses a 4-byte IPv4 address from a byte slice
pub fn parse_ipv4_address(data: &[u8], offset: &mut usize) -> Result<Address> {
    let ip_bytes: [u8; 4] = data
        .get(*offset..*offset + 4)
        .ok_or_else(|| anyhow!("not enough data for IPv4 address"))?
        .try_into()
        .map_err(|_| anyhow!("invalid IPv4 bytes"))?;

    // Push offset past address -> 4 bytes
    *offset += 4;

    Ok(Address::IPv4(ip_bytes))
}

/// parse_ipv6_address parses a 16-byte IPv6 address from a byte slice
pub fn parse_ipv6_address(data: &[u8], offset: &mut usize) -> Result<Address> {
    let ip_bytes: [u8; 16] = data
        .get(*offset..*offset + 16)
        .ok_or_else(|| anyhow!("not enough data for IPv6 address"))?
        .try_into()
        .map_err(|_| anyhow!("invalid IPv6 bytes"))?;

    // Push offset past address -> 16 bytes
    *offset += 16;

    Ok(Address::IPv6(ip_bytes))
}

/// parse_domain_address parses a length-prefixed domain from a byte slice
pub fn parse_domain_address(data: &[u8], offset: &mut usize) -> Result<Address> {
    // First byte holds the number of octets to follow
    let domain_len = *data
        .get(*offset)
        .ok_or_else(|| anyhow!("not enough data to read domain length"))?
        as usize;

    let start = *offset + 1;
    let name = data
        .get(start..start + domain_len)
        .ok_or_else(|| anyhow!("not enough data for domain of {domain_len} bytes"))?;

    // Push offset past length byte and name
    *offset = start + domain_len;

    Ok(Address::DomainName(name.to_vec()))
}

/// Destination is a dialable host and port. IPv6 hosts keep their brackets
/// so `host:port` is always unambiguous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

/// Destination implementation block
impl Destination {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// from_address pairs a decoded handshake address with its port
    pub fn from_address(address: &Address, port: u16) -> Self {
        Self::new(address.to_string(), port)
    }

    /// parse reads `host`, `host:port`, `[v6]`, `[v6]:port` or a bare IPv6
    /// literal. The port defaults to 443.
    pub fn parse(s: &str) -> Result<Self> {
        Self::parse_with_default(s, DEFAULT_PORT)
    }

    /// parse_with_default is parse with a caller-chosen fallback port
    pub fn parse_with_default(s: &str, default_port: u16) -> Result<Self> {
        let s = s.trim();

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let close = rest
                .find(']')
                .ok_or_else(|| anyhow!("unterminated IPv6 literal in '{s}'"))?;
            let host = format!("[{}]", &rest[..close]);
            match &rest[close + 1..] {
                "" => (host, None),
                tail => {
                    let port = tail
                        .strip_prefix(':')
                        .ok_or_else(|| anyhow!("unexpected text after IPv6 literal in '{s}'"))?;
                    (host, Some(port))
                }
            }
        } else if s.matches(':').count() > 1 {
            (format!("[{s}]"), None)
        } else {
            match s.rsplit_once(':') {
                Some((host, port)) => (host.to_string(), Some(port)),
                None => (s.to_string(), None),
            }
        };

        if host.is_empty() || host == "[]" {
            bail!("missing host in '{s}'");
        }

        let port = match port {
            Some(port) => port
                .parse()
                .map_err(|e| anyhow!("invalid port in '{s}': {e}"))?,
            None => default_port,
        };

        Ok(Self { host, port })
    }

    /// bare_host strips IPv6 brackets
    pub fn bare_host(&self) -> &str {
        self.host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(self.host.as_str())
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
