use crate::protocol::{MAX_DGRAM, STREAM_BUFFER};
use crate::router::{Dial, Route, Transport};
use anyhow::{Result, anyhow};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::{future::Future, io, net::SocketAddr, pin::Pin, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream, UdpSocket,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::mpsc,
    time::timeout,
};
use tracing::{debug, info, warn};

/// Inbound messages read ahead of the outbound writer
const WRITE_QUEUE: usize = 16;

/// How long queued client bytes may take to reach the destination once the
/// client has gone away
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// RelayState tracks a session through its lifecycle:
/// Opening -> Relaying -> Closing -> Closed, or Opening -> Closing when
/// the outbound leg cannot be opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Opening,
    Relaying,
    Closing,
    Closed,
}

/// CloseReason records which side ended a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Client closed the inbound channel
    InboundClosed,
    /// Destination reached end-of-stream
    OutboundClosed,
    /// Forwarding to the inbound channel failed
    InboundError,
    /// Reading from or writing to the destination failed
    OutboundError,
}

/// RelayReport summarises a finished session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayReport {
    pub from_client: u64,
    pub from_server: u64,
    pub reason: CloseReason,
    /// State the session was in when it returned
    pub state: RelayState,
}

/// How one direction of the pump finished
enum PumpEnd {
    InboundClosed,
    OutboundClosed,
    InboundFailed(anyhow::Error),
    OutboundFailed(io::Error),
}

/// Outbound holds the opened destination socket
enum Outbound {
    Stream(TcpStream),
    Datagram { socket: UdpSocket, target: SocketAddr },
}

/// RelaySession pairs one inbound channel with one outbound socket
pub struct RelaySession {
    route: Route,
    state: RelayState,
}

/// RelaySession implementation block
impl RelaySession {
    /// new is a constructor for a session that has not opened anything yet
    pub fn new(route: Route) -> Self {
        Self {
            route,
            state: RelayState::Opening,
        }
    }

    fn advance(&mut self, next: RelayState) {
        debug!("session {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn report(&self, from_client: u64, from_server: u64, reason: CloseReason) -> RelayReport {
        RelayReport {
            from_client,
            from_server,
            reason,
            state: self.state,
        }
    }

    /// run opens the outbound leg and pumps bytes both ways until either side
    /// closes. `first_payload` is written to the destination before any
    /// message read from `inbound_rx`.
    ///
    /// The inbound channel is watched from the moment the session starts, so
    /// a client leaving while the destination is still being dialed, or while
    /// the destination has stopped reading, ends the session within
    /// [`CLOSE_GRACE`].
    pub async fn run<R, W>(
        mut self,
        first_payload: Vec<u8>,
        mut inbound_rx: R,
        mut inbound_tx: W,
    ) -> Result<RelayReport>
    where
        R: Stream<Item = Vec<u8>> + Unpin,
        W: Sink<Vec<u8>> + Unpin,
        W::Error: std::error::Error + Send + Sync + 'static,
    {
        let destination = self.route.destination.clone();

        let (queue_tx, queue_rx) = mpsc::channel(WRITE_QUEUE);
        let forward = pump_inbound_to_queue(&mut inbound_rx, queue_tx);
        tokio::pin!(forward);

        let opened = select! {
            opened = open_outbound(&self.route) => Some(opened),
            _ = &mut forward => None,
        };

        let outbound = match opened {
            Some(Ok(outbound)) => outbound,
            Some(Err(e)) => {
                self.advance(RelayState::Closing);
                let _ = inbound_tx.close().await;
                self.advance(RelayState::Closed);
                return Err(e.context(format!("failed to open outbound to {destination}")));
            }
            None => {
                debug!("client left before {destination} was reached");
                self.advance(RelayState::Closing);
                let _ = inbound_tx.close().await;
                self.advance(RelayState::Closed);
                return Ok(self.report(0, 0, CloseReason::InboundClosed));
            }
        };

        self.advance(RelayState::Relaying);

        let (end, from_client, from_server) = match outbound {
            Outbound::Stream(stream) => {
                relay_stream(
                    stream,
                    first_payload,
                    forward.as_mut(),
                    queue_rx,
                    &mut inbound_tx,
                )
                .await
            }
            Outbound::Datagram { socket, target } => {
                relay_datagram(
                    socket,
                    target,
                    first_payload,
                    forward.as_mut(),
                    queue_rx,
                    &mut inbound_tx,
                )
                .await
            }
        };

        self.advance(RelayState::Closing);

        let reason = match end {
            PumpEnd::InboundClosed => CloseReason::InboundClosed,
            PumpEnd::OutboundClosed => CloseReason::OutboundClosed,
            PumpEnd::InboundFailed(e) => {
                debug!("inbound channel error for {destination}: {e}");
                CloseReason::InboundError
            }
            PumpEnd::OutboundFailed(e) => {
                warn!("outbound error for {destination}: {e}");
                CloseReason::OutboundError
            }
        };

        // Inbound may already be gone, closing it again is harmless
        let _ = inbound_tx.close().await;

        self.advance(RelayState::Closed);

        // DEBUG
        info!(
            "connection to {} closed ({:?}): {} bytes from client, {} bytes from server",
            destination, reason, from_client, from_server
        );

        Ok(self.report(from_client, from_server, reason))
    }
}

/// open_outbound connects the stream or creates the datagram socket for a route
async fn open_outbound(route: &Route) -> Result<Outbound> {
    let destination = &route.destination;

    match (route.transport, &route.dial) {
        (Transport::Stream, Dial::Direct) => {
            let stream = TcpStream::connect(destination.to_string()).await?;
            Ok(Outbound::Stream(stream))
        }
        (Transport::Stream, Dial::Socks5(upstream)) => {
            let stream = upstream.connect(destination).await?;
            Ok(Outbound::Stream(stream))
        }
        (Transport::Datagram, _) => {
            // Resolve once, every datagram goes to the same address
            let target = tokio::net::lookup_host(destination.to_string())
                .await?
                .next()
                .ok_or_else(|| anyhow!("no address found for {destination}"))?;

            let bind_addr = if target.is_ipv4() {
                "0.0.0.0:0"
            } else {
                "[::]:0"
            };
            let socket = UdpSocket::bind(bind_addr).await?;

            // DEBUG
            debug!(
                "UDP relay via {} -> {}",
                socket.local_addr()?,
                target
            );

            Ok(Outbound::Datagram { socket, target })
        }
    }
}

/// pump_inbound_to_queue hands inbound messages to the outbound writer and
/// reports the end of the inbound channel as soon as it is seen, even while
/// the writer is stuck on a destination that stopped reading
async fn pump_inbound_to_queue<R>(inbound_rx: &mut R, queue: mpsc::Sender<Vec<u8>>) -> PumpEnd
where
    R: Stream<Item = Vec<u8>> + Unpin,
{
    while let Some(message) = inbound_rx.next().await {
        if queue.send(message).await.is_err() {
            // Writer is gone, its own result ends the session
            return PumpEnd::OutboundClosed;
        }
    }

    PumpEnd::InboundClosed
}

/// relay_stream runs both directions over a TCP outbound and half-closes the
/// destination when the client goes away
async fn relay_stream<F, W>(
    stream: TcpStream,
    first_payload: Vec<u8>,
    forward: Pin<&mut F>,
    queue: mpsc::Receiver<Vec<u8>>,
    inbound_tx: &mut W,
) -> (PumpEnd, u64, u64)
where
    F: Future<Output = PumpEnd>,
    W: Sink<Vec<u8>> + Unpin,
    W::Error: std::error::Error + Send + Sync + 'static,
{
    let (mut reader, writer) = stream.into_split();
    let mut from_client = 0u64;
    let mut from_server = 0u64;

    let write = pump_queue_to_stream(first_payload, queue, writer, &mut from_client);
    let read = pump_stream_to_inbound(&mut reader, inbound_tx, &mut from_server);
    let end = settle(forward, write, read).await;

    (end, from_client, from_server)
}

/// settle waits for the first direction to finish. When the client went
/// away first, whatever it queued gets [`CLOSE_GRACE`] to reach the
/// destination before the writer is dropped.
async fn settle<F, Wr, Rd>(mut forward: Pin<&mut F>, write: Wr, read: Rd) -> PumpEnd
where
    F: Future<Output = PumpEnd>,
    Wr: Future<Output = PumpEnd>,
    Rd: Future<Output = PumpEnd>,
{
    tokio::pin!(write);

    let (end, write_done) = select! {
        biased;
        end = &mut write => (end, true),
        end = read => (end, false),
        end = &mut forward => (end, false),
    };

    if let (PumpEnd::InboundClosed, false) = (&end, write_done) {
        if timeout(CLOSE_GRACE, &mut write).await.is_err() {
            debug!("destination stalled, dropping outbound after {:?}", CLOSE_GRACE);
        }
    }

    end
}

/// pump_queue_to_stream writes the trailing payload, then every queued
/// message, then half-closes the destination once the queue ends
async fn pump_queue_to_stream(
    first_payload: Vec<u8>,
    mut queue: mpsc::Receiver<Vec<u8>>,
    mut writer: OwnedWriteHalf,
    counter: &mut u64,
) -> PumpEnd {
    // Bytes that trailed the handshake precede every later message
    if !first_payload.is_empty() {
        if let Err(e) = writer.write_all(&first_payload).await {
            return PumpEnd::OutboundFailed(e);
        }
        *counter += first_payload.len() as u64;
    }

    while let Some(message) = queue.recv().await {
        if let Err(e) = writer.write_all(&message).await {
            return PumpEnd::OutboundFailed(e);
        }
        *counter += message.len() as u64;
    }

    if let Err(e) = writer.shutdown().await {
        debug!("outbound half-close failed: {e}");
    }

    PumpEnd::InboundClosed
}

/// pump_stream_to_inbound forwards each read from the destination as one message
async fn pump_stream_to_inbound<W>(
    reader: &mut OwnedReadHalf,
    inbound_tx: &mut W,
    counter: &mut u64,
) -> PumpEnd
where
    W: Sink<Vec<u8>> + Unpin,
    W::Error: std::error::Error + Send + Sync + 'static,
{
    let mut buffer = vec![0u8; STREAM_BUFFER];

    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => return PumpEnd::OutboundClosed,
            Ok(len) => {
                if let Err(e) = inbound_tx.send(buffer[..len].to_vec()).await {
                    return PumpEnd::InboundFailed(e.into());
                }
                *counter += len as u64;
            }
            Err(e) => return PumpEnd::OutboundFailed(e),
        }
    }
}

/// relay_datagram maps inbound messages to datagrams and back
async fn relay_datagram<F, W>(
    socket: UdpSocket,
    target: SocketAddr,
    first_payload: Vec<u8>,
    forward: Pin<&mut F>,
    queue: mpsc::Receiver<Vec<u8>>,
    inbound_tx: &mut W,
) -> (PumpEnd, u64, u64)
where
    F: Future<Output = PumpEnd>,
    W: Sink<Vec<u8>> + Unpin,
    W::Error: std::error::Error + Send + Sync + 'static,
{
    let mut from_client = 0u64;
    let mut from_server = 0u64;

    let write = pump_queue_to_datagram(first_payload, queue, &socket, target, &mut from_client);
    let read = pump_datagram_to_inbound(&socket, target, inbound_tx, &mut from_server);
    let end = settle(forward, write, read).await;

    (end, from_client, from_server)
}

/// pump_queue_to_datagram sends the trailing payload, then each queued
/// message, as one datagram apiece
async fn pump_queue_to_datagram(
    first_payload: Vec<u8>,
    mut queue: mpsc::Receiver<Vec<u8>>,
    socket: &UdpSocket,
    target: SocketAddr,
    counter: &mut u64,
) -> PumpEnd {
    if !first_payload.is_empty() {
        if let Err(e) = socket.send_to(&first_payload, target).await {
            return PumpEnd::OutboundFailed(e);
        }
        *counter += first_payload.len() as u64;
    }

    while let Some(message) = queue.recv().await {
        if let Err(e) = socket.send_to(&message, target).await {
            return PumpEnd::OutboundFailed(e);
        }
        *counter += message.len() as u64;
    }

    PumpEnd::InboundClosed
}

/// pump_datagram_to_inbound forwards each datagram from the target as one message
async fn pump_datagram_to_inbound<W>(
    socket: &UdpSocket,
    target: SocketAddr,
    inbound_tx: &mut W,
    counter: &mut u64,
) -> PumpEnd
where
    W: Sink<Vec<u8>> + Unpin,
    W::Error: std::error::Error + Send + Sync + 'static,
{
    let mut buffer = vec![0u8; MAX_DGRAM];

    loop {
        match socket.recv_from(&mut buffer).await {
            Ok((len, from_addr)) => {
                // Verify response is from expected target
                if from_addr != target {
                    debug!("dropping datagram from {from_addr} (expected {target})");
                    continue;
                }

                if let Err(e) = inbound_tx.send(buffer[..len].to_vec()).await {
                    return PumpEnd::InboundFailed(e.into());
                }
                *counter += len as u64;
            }
            Err(e) => return PumpEnd::OutboundFailed(e),
        }
    }
}
