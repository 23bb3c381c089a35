//! Upstream SOCKS5 client used for routed stream sessions
//!
//! - [SOCKS5 (RFC 1928)](https://datatracker.ietf.org/doc/html/rfc1928)
//! - [Username/Password Authentication (RFC 1929)](https://datatracker.ietf.org/doc/html/rfc1929)

use crate::address::Destination;
use crate::auth::UserPass;
use anyhow::{Result, anyhow, bail};
use std::net::{Ipv4Addr, Ipv6Addr};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tracing::debug;

/// Port assumed when the upstream address omits one
pub const DEFAULT_SOCKS_PORT: u16 = 1080;

// RSV: Fields marked RESERVED (RSV) must be set to X'00'.
const RSV: u8 = 0x00;

/// Username/password sub-negotiation version
const USERPASS_VERSION: u8 = 0x01;

/// Version represents available SOCKS proxy versions
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
enum Version {
    SOCKS5 = 0x05,
}

/// AuthMethod represents the SOCKS5 authentication methods we offer
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
enum AuthMethod {
    NoAuth = 0x00,
    UserPass = 0x02,
    NoAcceptable = 0xFF,
}

/// Only CONNECT is ever issued upstream
const CMD_CONNECT: u8 = 0x01;

/// SocksAddressType represents the SOCKS5 address types, which use
/// different values than the handshake's address kinds
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
enum SocksAddressType {
    IPv4 = 0x01,
    DomainName = 0x03,
    IPv6 = 0x04,
}

/// reply_message describes a non-success REP field
fn reply_message(code: u8) -> &'static str {
    match code {
        0x01 => "general server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unassigned reply code",
    }
}

/// Socks5Upstream is a SOCKS5 proxy that selected stream sessions are
/// dialed through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Socks5Upstream {
    pub server: Destination,
    pub auth: Option<UserPass>,
}

/// Socks5Upstream implementation block
impl Socks5Upstream {
    /// parse reads `[user:pass@]host[:port]`
    pub fn parse(s: &str) -> Result<Self> {
        let (auth, server) = match s.trim().rsplit_once('@') {
            Some((creds, server)) => {
                let (username, password) = creds
                    .split_once(':')
                    .ok_or_else(|| anyhow!("SOCKS5 credentials must be user:pass"))?;
                let auth = UserPass {
                    username: username.to_string(),
                    password: password.to_string(),
                };
                (Some(auth), server)
            }
            None => (None, s.trim()),
        };

        if let Some(auth) = &auth {
            if auth.username.is_empty() || auth.username.len() > 255 || auth.password.len() > 255
            {
                bail!("SOCKS5 username must be 1-255 bytes and password at most 255 bytes");
            }
        }

        Ok(Self {
            server: Destination::parse_with_default(server, DEFAULT_SOCKS_PORT)?,
            auth,
        })
    }

    /// connect opens a stream to `target` through the upstream proxy
    pub async fn connect(&self, target: &Destination) -> Result<TcpStream> {
        let mut stream = TcpStream::connect(self.server.to_string()).await?;

        self.negotiate_auth(&mut stream).await?;
        send_connect(&mut stream, target).await?;

        // DEBUG
        debug!("SOCKS5 upstream {} connected to {}", self.server, target);

        Ok(stream)
    }

    /// negotiate_auth offers our methods and runs the selected one
    async fn negotiate_auth(&self, stream: &mut TcpStream) -> Result<()> {
        // ClientHello format
        // +----+----------+----------+
        // |VER | NMETHODS | METHODS  |
        // +----+----------+----------+
        // | 1  |    1     | 1 to 255 |
        // +----+----------+----------+
        let mut hello = vec![Version::SOCKS5 as u8];
        match self.auth {
            Some(_) => hello.extend_from_slice(&[
                2,
                AuthMethod::NoAuth as u8,
                AuthMethod::UserPass as u8,
            ]),
            None => hello.extend_from_slice(&[1, AuthMethod::NoAuth as u8]),
        }
        stream.write_all(&hello).await?;

        let mut choice = [0u8; 2];
        stream.read_exact(&mut choice).await?;

        if choice[0] != Version::SOCKS5 as u8 {
            bail!("upstream is not SOCKS5");
        }

        match (choice[1], &self.auth) {
            (m, _) if m == AuthMethod::NoAuth as u8 => Ok(()),
            (m, Some(creds)) if m == AuthMethod::UserPass as u8 => {
                authenticate_userpass(stream, creds).await
            }
            (m, _) if m == AuthMethod::NoAcceptable as u8 => {
                bail!("upstream accepted none of the offered auth methods")
            }
            (m, _) => bail!("upstream selected unexpected auth method {m:#04x}"),
        }
    }
}

/// authenticate_userpass runs the RFC 1929 sub-negotiation
async fn authenticate_userpass(stream: &mut TcpStream, creds: &UserPass) -> Result<()> {
    // Client Username/Password Request
    // +----+------+----------+------+----------+
    // |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
    // +----+------+----------+------+----------+
    // | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
    // +----+------+----------+------+----------+
    let mut request = vec![USERPASS_VERSION, creds.username.len() as u8];
    request.extend_from_slice(creds.username.as_bytes());
    request.push(creds.password.len() as u8);
    request.extend_from_slice(creds.password.as_bytes());
    stream.write_all(&request).await?;

    let mut status = [0u8; 2];
    stream.read_exact(&mut status).await?;

    if status[1] != 0x00 {
        bail!("upstream SOCKS5 authentication failed");
    }

    Ok(())
}

/// send_connect issues CONNECT for `target` and consumes the reply
async fn send_connect(stream: &mut TcpStream, target: &Destination) -> Result<()> {
    // SOCKS5 request format
    // +----+-----+-------+------+----------+----------+
    // |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
    // +----+-----+-------+------+----------+----------+
    // | 1  |  1  | X'00' |  1   | Variable |    2     |
    // +----+-----+-------+------+----------+----------+
    let mut request = vec![Version::SOCKS5 as u8, CMD_CONNECT, RSV];
    encode_address(&mut request, target)?;
    stream.write_all(&request).await?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await?;

    if reply[0] != Version::SOCKS5 as u8 {
        bail!("upstream reply is not SOCKS5");
    }
    if reply[1] != 0x00 {
        bail!(
            "upstream refused CONNECT to {target}: {}",
            reply_message(reply[1])
        );
    }

    // Drain BND.ADDR and BND.PORT
    let addr_len = match reply[3] {
        t if t == SocksAddressType::IPv4 as u8 => 4,
        t if t == SocksAddressType::IPv6 as u8 => 16,
        t if t == SocksAddressType::DomainName as u8 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize
        }
        t => bail!("upstream replied with unknown address type {t}"),
    };
    let mut bound = vec![0u8; addr_len + 2];
    stream.read_exact(&mut bound).await?;

    Ok(())
}

/// encode_address appends ATYP, DST.ADDR and DST.PORT for `target`
fn encode_address(buf: &mut Vec<u8>, target: &Destination) -> Result<()> {
    let host = target.bare_host();

    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        buf.push(SocksAddressType::IPv4 as u8);
        buf.extend_from_slice(&ip.octets());
    } else if let Ok(ip) = host.parse::<Ipv6Addr>() {
        buf.push(SocksAddressType::IPv6 as u8);
        buf.extend_from_slice(&ip.octets());
    } else {
        if host.is_empty() || host.len() > 255 {
            bail!("domain name must be 1-255 bytes: {host}");
        }
        buf.push(SocksAddressType::DomainName as u8);
        buf.push(host.len() as u8);
        buf.extend_from_slice(host.as_bytes());
    }

    buf.extend_from_slice(&target.port.to_be_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn parse_upstream_forms() {
        let plain = Socks5Upstream::parse("10.0.0.1").unwrap();
        assert_eq!(plain.server, Destination::new("10.0.0.1", 1080));
        assert!(plain.auth.is_none());

        let authed = Socks5Upstream::parse("user:p@ss@proxy.example:9050").unwrap();
        assert_eq!(authed.server, Destination::new("proxy.example", 9050));
        assert_eq!(
            authed.auth,
            Some(UserPass {
                username: "user".into(),
                password: "p@ss".into(),
            })
        );

        assert!(Socks5Upstream::parse("nopass@proxy.example:1080").is_err());
    }

    #[test]
    fn encodes_each_address_type() {
        let mut buf = Vec::new();
        encode_address(&mut buf, &Destination::new("1.2.3.4", 443)).unwrap();
        assert_eq!(buf, [1, 1, 2, 3, 4, 0x01, 0xBB]);

        let mut buf = Vec::new();
        encode_address(&mut buf, &Destination::new("[0:0:0:0:0:0:0:1]", 80)).unwrap();
        assert_eq!(buf[0], 4);
        assert_eq!(buf[16], 1);
        assert_eq!(&buf[17..], [0, 80]);

        let mut buf = Vec::new();
        encode_address(&mut buf, &Destination::new("example.com", 80)).unwrap();
        assert_eq!(buf[0], 3);
        assert_eq!(buf[1], 11);
        assert_eq!(&buf[2..13], b"example.com");
    }

    #[tokio::test]
    async fn connects_through_authenticating_upstream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();

            let mut hello = [0u8; 4];
            sock.read_exact(&mut hello).await.unwrap();
            assert_eq!(hello, [5, 2, 0x00, 0x02]);
            sock.write_all(&[5, 0x02]).await.unwrap();

            let mut auth = [0u8; 1 + 1 + 4 + 1 + 6];
            sock.read_exact(&mut auth).await.unwrap();
            assert_eq!(&auth[2..6], b"user");
            assert_eq!(&auth[7..], b"secret");
            sock.write_all(&[1, 0]).await.unwrap();

            let mut request = [0u8; 3 + 1 + 1 + 11 + 2];
            sock.read_exact(&mut request).await.unwrap();
            assert_eq!(&request[..5], [5, 1, 0, 3, 11]);
            assert_eq!(&request[5..16], b"example.com");
            assert_eq!(&request[16..], [0, 80]);
            sock.write_all(&[5, 0, 0, 1, 127, 0, 0, 1, 0x1f, 0x90])
                .await
                .unwrap();

            sock.write_all(b"through").await.unwrap();
        });

        let upstream = Socks5Upstream::parse(&format!("user:secret@{addr}")).unwrap();
        let mut stream = upstream
            .connect(&Destination::new("example.com", 80))
            .await
            .unwrap();

        let mut buf = [0u8; 7];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"through");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn refused_connect_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut hello = [0u8; 3];
            sock.read_exact(&mut hello).await.unwrap();
            sock.write_all(&[5, 0x00]).await.unwrap();

            let mut request = [0u8; 3 + 1 + 4 + 2];
            sock.read_exact(&mut request).await.unwrap();
            sock.write_all(&[5, 0x05, 0, 1, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        });

        let upstream = Socks5Upstream::parse(&addr.to_string()).unwrap();
        let err = upstream
            .connect(&Destination::new("10.1.2.3", 22))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }
}
