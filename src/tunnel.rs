use crate::config::ServerConfig;
use crate::header::parse_handshake;
use crate::relay::{RelayReport, RelaySession};
use crate::router::{self, Dial};
use anyhow::Result;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use tracing::{Instrument, debug, info, info_span, warn};

/// handle_channel runs one inbound channel from its first frame to teardown:
/// parse and authenticate the handshake, route it, then relay.
///
/// A rejected handshake is logged at WARN and closes the channel without
/// sending anything and without opening an outbound connection; like a
/// channel that closes before its first frame, it yields `Ok(None)`.
/// Errors are reserved for sessions that were accepted and then failed.
pub async fn handle_channel<R, W>(
    config: &ServerConfig,
    peer: impl Display,
    inbound_rx: R,
    inbound_tx: W,
) -> Result<Option<RelayReport>>
where
    R: Stream<Item = Vec<u8>> + Unpin,
    W: Sink<Vec<u8>> + Unpin,
    W::Error: std::error::Error + Send + Sync + 'static,
{
    let span = info_span!("session", peer = %peer);
    run_channel(config, inbound_rx, inbound_tx)
        .instrument(span)
        .await
}

async fn run_channel<R, W>(
    config: &ServerConfig,
    mut inbound_rx: R,
    mut inbound_tx: W,
) -> Result<Option<RelayReport>>
where
    R: Stream<Item = Vec<u8>> + Unpin,
    W: Sink<Vec<u8>> + Unpin,
    W::Error: std::error::Error + Send + Sync + 'static,
{
    let Some(frame) = inbound_rx.next().await else {
        debug!("channel closed before handshake");
        return Ok(None);
    };

    let request = match parse_handshake(&frame, &config.credential) {
        Ok(request) => request,
        Err(e) => {
            warn!("rejected handshake: {:#}", e);
            let _ = inbound_tx.close().await;
            return Ok(None);
        }
    };

    let route = router::route(&request, config);

    // DEBUG
    info!(
        "{:?} to {}:{} -> {}{}{}",
        route.transport,
        request.address,
        request.port,
        route.destination,
        if route.overridden { " (override)" } else { "" },
        match &route.dial {
            Dial::Direct => String::new(),
            Dial::Socks5(upstream) => format!(" via SOCKS5 {}", upstream.server),
        }
    );

    let payload = request.payload(&frame).to_vec();
    let report = RelaySession::new(route)
        .run(payload, inbound_rx, inbound_tx)
        .await?;

    Ok(Some(report))
}
