use anyhow::Result;
use clap::Parser;
use tracing::{debug, info};
use vlessproxy::{Credential, Destination, ProxyServer, ServerConfig, Socks5Upstream, link};

#[derive(Parser, Debug)]
#[command(author, version, about = "A lightweight VLESS-over-WebSocket tunneling proxy", long_about = None)]
struct Args {
    /// Client UUID every handshake must carry
    #[arg(short, long, env = "UUID")]
    uuid: String,

    /// Fixed endpoint (host[:port]) every session connects to instead of its own destination
    #[arg(long, env = "PROXYIP")]
    proxy_ip: Option<String>,

    /// Listener IP address
    #[arg(short, long, env = "BIND", default_value = "0.0.0.0")]
    bind: String,

    /// Listener port
    #[arg(short, long, env = "PORT", default_value_t = 80)]
    port: u16,

    /// WebSocket path handed out in share links, query included
    #[arg(long, env = "WS_PATH", default_value = "/?ed=2560")]
    path: String,

    /// Public hostname used in share links
    #[arg(long, env = "HOST", default_value = "localhost")]
    host: String,

    /// Upstream SOCKS5 proxy as [user:pass@]host:port
    #[arg(long, env = "SOCKS5")]
    socks5: Option<String>,

    /// Host patterns dialed through the SOCKS5 proxy
    #[arg(
        long,
        env = "GO2SOCKS5",
        value_delimiter = ',',
        default_value = "*.pubg.com,*.krafton.com"
    )]
    socks5_route: Vec<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse args
    let args = Args::parse();

    // Initialize tracing subscriber
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    let credential: Credential = args.uuid.parse()?;

    let override_destination = args
        .proxy_ip
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(Destination::parse)
        .transpose()?;

    // Check for an upstream proxy and grab it if present
    let socks5 = match args.socks5.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => {
            info!("SOCKS5 upstream enabled for {:?}", args.socks5_route);
            Some(Socks5Upstream::parse(s)?)
        }
        _ => None,
    };

    let listen = if args.bind.contains(':') {
        format!("[{}]:{}", args.bind, args.port)
    } else {
        format!("{}:{}", args.bind, args.port)
    };

    let config = ServerConfig::new(credential)
        .with_override(override_destination)
        .with_listen(listen)
        .with_path(args.path)
        .with_hostname(args.host)
        .with_socks5(socks5, args.socks5_route);

    if let Some(fixed) = &config.override_destination {
        info!("all sessions pinned to {}", fixed);
    }
    debug!("share link: {}", link::share_link(&config));

    // Instantiate server
    let mut server = ProxyServer::new(config);

    // Run it
    info!("Starting tunnel proxy: {}", server.config.listen_addr);
    server.run().await
}
