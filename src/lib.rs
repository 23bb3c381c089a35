//! A lightweight VLESS-over-WebSocket tunneling proxy library
//!
//! ## Implementation
//!
//! - Features:
//!     - Binary handshake carrying a 16-byte credential, a destination and a transport selector
//!     - IPv4, domain name and IPv6 destinations
//!     - Stream (TCP) and datagram (UDP) outbound legs
//!     - Optional fixed override of every destination
//!     - Optional upstream SOCKS5 proxy for selected hosts
//!     - Async using tokio, one task per WebSocket connection
//!     - Status page and `vless://` share link over plain HTTP
//!
//! # Example
//! ```no_run
//! use vlessproxy::{Credential, ProxyServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let credential: Credential = "a10d76fd-25ec-4d5a-bdf1-6593a73e2e16".parse()?;
//!     let mut server = ProxyServer::new(ServerConfig::new(credential).with_listen("127.0.0.1:8080"));
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod auth;
pub mod config;
pub mod header;
pub mod link;
pub mod protocol;
pub mod relay;
pub mod router;
pub mod server;
pub mod socks5;
pub mod tunnel;

// Re-export main types at crate root for convenience
pub use address::{Address, Destination};
pub use auth::{Credential, UserPass};
pub use config::ServerConfig;
pub use header::{HandshakeRequest, parse_handshake};
pub use protocol::{AddressType, Command};
pub use relay::{CloseReason, RelayReport, RelaySession, RelayState};
pub use router::{Dial, Route, Transport};
pub use server::ProxyServer;
pub use socks5::Socks5Upstream;
