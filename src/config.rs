use crate::address::Destination;
use crate::auth::Credential;
use crate::socks5::Socks5Upstream;

/// Default listen address
pub const DEFAULT_LISTEN: &str = "0.0.0.0:80";

/// Default WebSocket path advertised to clients
pub const DEFAULT_PATH: &str = "/?ed=2560";

/// ServerConfig holds every setting the proxy reads. It is built once at
/// startup and shared read-only between connections.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub credential: Credential,
    /// Fixed endpoint that replaces every handshake destination when set
    pub override_destination: Option<Destination>,
    pub listen_addr: String,
    /// Upgrade path including any query, as handed out in share links
    pub path: String,
    /// Hostname used only when rendering share links
    pub hostname: String,
    pub socks5: Option<Socks5Upstream>,
    /// Host patterns whose stream sessions are dialed through `socks5`
    pub socks5_routes: Vec<String>,
}

/// ServerConfig implementation block
impl ServerConfig {
    /// new is a constructor for the ServerConfig type
    pub fn new(credential: Credential) -> Self {
        Self {
            credential,
            override_destination: None,
            listen_addr: DEFAULT_LISTEN.to_string(),
            path: DEFAULT_PATH.to_string(),
            hostname: "localhost".to_string(),
            socks5: None,
            socks5_routes: Vec::new(),
        }
    }

    /// with_override pins every outbound connection to one endpoint
    pub fn with_override(mut self, destination: Option<Destination>) -> Self {
        self.override_destination = destination;
        self
    }

    pub fn with_listen(mut self, listen_addr: impl Into<String>) -> Self {
        self.listen_addr = listen_addr.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// with_socks5 applies the upstream proxy and the hosts routed through it
    pub fn with_socks5(mut self, upstream: Option<Socks5Upstream>, routes: Vec<String>) -> Self {
        self.socks5 = upstream;
        self.socks5_routes = routes;
        self
    }

    /// ws_path is the path component of `path`, the route the upgrade is served on
    pub fn ws_path(&self) -> String {
        let path = self.path.split(['?', '#']).next().unwrap_or_default();
        match path {
            "" => "/".to_string(),
            p if p.starts_with('/') => p.to_string(),
            p => format!("/{p}"),
        }
    }
}
