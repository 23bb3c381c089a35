use crate::auth::Credential;
use crate::config::ServerConfig;
use crate::link;
use crate::tunnel;
use anyhow::{Result, anyhow, bail};
use axum::{
    Router,
    extract::{
        ConnectInfo, Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use futures::{SinkExt, StreamExt, future};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{error, info};

/// ProxyServer represents the tunnel server and houses its configuration
pub struct ProxyServer {
    pub config: Arc<ServerConfig>,
    listener: Option<TcpListener>,
}

/// ProxyServer implementation block
impl ProxyServer {
    /// new is a constructor for the ProxyServer type
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            listener: None,
        }
    }

    /// bind to the listen address; binding twice is an error
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        if self.listener.is_some() {
            bail!("bind can only be called once");
        }

        // Instantiate tokio listener
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        let addr = listener.local_addr()?;

        // DEBUG
        info!(
            "proxy listening on {:?}, upgrade path {}",
            addr,
            self.config.ws_path()
        );

        self.listener = Some(listener);
        Ok(addr)
    }

    /// run serves HTTP and WebSocket upgrades until the listener fails
    pub async fn run(&mut self) -> Result<()> {
        if self.listener.is_none() {
            self.bind().await?;
        }
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow!("listener not bound"))?;

        let app = router(Arc::clone(&self.config));
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;

        Ok(())
    }
}

/// router builds the HTTP surface: the upgrade path, the status page and
/// the share link page
pub fn router(config: Arc<ServerConfig>) -> Router {
    let ws_path = config.ws_path();

    let mut app = Router::new().route(&ws_path, get(tunnel_or_status));
    if ws_path != "/" {
        app = app.route("/", get(status_page));
    }

    app.route("/{credential}", get(share_link)).with_state(config)
}

/// tunnel_or_status upgrades WebSocket requests and answers everything
/// else with the status page
async fn tunnel_or_status(
    State(config): State<Arc<ServerConfig>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match upgrade {
        Ok(ws) => ws.on_upgrade(move |socket| handle_socket(socket, config, peer)),
        Err(_) => status_page().await.into_response(),
    }
}

async fn status_page() -> Html<&'static str> {
    Html(link::status_page())
}

/// share_link answers `/<uuid>` with the import link, and nothing else
async fn share_link(
    State(config): State<Arc<ServerConfig>>,
    Path(segment): Path<String>,
) -> Response {
    match segment.parse::<Credential>() {
        Ok(credential) if credential == config.credential => {
            link::share_link(&config).into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

/// handle_socket adapts a WebSocket into the message channel the tunnel
/// runs on: data frames in, binary frames out, Close or an error ends input
async fn handle_socket(socket: WebSocket, config: Arc<ServerConfig>, peer: SocketAddr) {
    // DEBUG
    info!("new client: {}", peer);

    let (sink, stream) = socket.split();

    let inbound_tx = Box::pin(sink.with(|data: Vec<u8>| {
        future::ready(Ok::<_, axum::Error>(Message::Binary(data.into())))
    }));

    let inbound_rx = Box::pin(
        stream
            .take_while(|msg| {
                future::ready(matches!(msg, Ok(m) if !matches!(m, Message::Close(_))))
            })
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Binary(data)) => Some(data.to_vec()),
                    Ok(Message::Text(text)) => Some(text.as_str().as_bytes().to_vec()),
                    _ => None,
                })
            }),
    );

    // Send connection to tunnel handler
    if let Err(e) = tunnel::handle_channel(&config, peer, inbound_rx, inbound_tx).await {
        error!("connection error from {}: {:#}", peer, e);
    }
}
