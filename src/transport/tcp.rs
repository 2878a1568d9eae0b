//! TCP front end.
//!
//! One task per accepted socket drives a [`Connection`]: socket reads are
//! supplied to it, handshake bytes go straight back to the client, and
//! decoded frames leave through a shared [`GatewayEvent`] channel. Once a
//! protocol is detected the relay receives a sender for frames bound to
//! that client.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::GatewayConfig;
use crate::detecting::detector::ProtocolDetector;
use crate::detecting::signature::Signature;
use crate::error::{constants, ProtocolError, Result};
use crate::gateway::{pipeline, CodecFactory, Connection, ConnectionEvent, ConnectionHandle, ProtocolFrame};
use crate::utils::metrics::Metrics;

/// What the TCP front end reports to the relay
#[derive(Debug)]
pub enum GatewayEvent {
    Detected {
        handle: ConnectionHandle,
        peer: SocketAddr,
        protocol: String,
        /// Frames sent here are encoded with the connection's codec
        outbound: mpsc::Sender<ProtocolFrame>,
    },
    Frame {
        handle: ConnectionHandle,
        frame: ProtocolFrame,
    },
    Rejected {
        handle: ConnectionHandle,
        reason: &'static str,
    },
    Closed {
        handle: ConnectionHandle,
    },
}

struct Shared {
    signatures: Arc<[Signature]>,
    factory: CodecFactory,
    max_buffer_size: usize,
    detection_timeout: Duration,
    read_buffer_size: usize,
    backpressure_limit: usize,
    metrics: Arc<Metrics>,
}

/// Run the front end until CTRL+C
#[instrument(skip(config, events), fields(address = %config.server.address))]
pub async fn start_server(config: GatewayConfig, events: mpsc::Sender<GatewayEvent>) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received CTRL+C signal, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });

    start_server_with_shutdown(config, events, shutdown_rx).await
}

/// Bind the configured address and serve until `shutdown_rx` fires
#[instrument(skip(config, events, shutdown_rx), fields(address = %config.server.address))]
pub async fn start_server_with_shutdown(
    config: GatewayConfig,
    events: mpsc::Sender<GatewayEvent>,
    shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    config.validate_strict()?;
    let listener = TcpListener::bind(&config.server.address).await?;
    serve(listener, config, events, shutdown_rx, Arc::new(Metrics::new())).await
}

/// Serve an already bound listener.
///
/// On shutdown, stops accepting and waits up to the configured shutdown
/// timeout for open connections to finish.
pub async fn serve(
    listener: TcpListener,
    config: GatewayConfig,
    events: mpsc::Sender<GatewayEvent>,
    mut shutdown_rx: mpsc::Receiver<()>,
    metrics: Arc<Metrics>,
) -> Result<()> {
    let (signatures, factory) = pipeline(&config)?;
    let shared = Arc::new(Shared {
        signatures,
        factory,
        max_buffer_size: config.detection.max_buffer_size,
        detection_timeout: config.detection.timeout,
        read_buffer_size: config.server.read_buffer_size,
        backpressure_limit: config.server.backpressure_limit,
        metrics,
    });
    let next_handle = AtomicU64::new(1);

    if let Ok(addr) = listener.local_addr() {
        info!(address = %addr, "Gateway listening");
    }

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutting down gateway. Waiting for connections to close...");
                drain(&shared.metrics, config.server.shutdown_timeout).await;
                shared.metrics.log_summary();
                return Ok(());
            }

            accept_result = listener.accept() => {
                let (stream, peer) = match accept_result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                        continue;
                    }
                };

                let active = shared.metrics.snapshot().connections_active;
                if active >= config.server.max_connections as u64 {
                    warn!(peer = %peer, active, "Connection limit reached, refusing");
                    shared.metrics.connection_rejected();
                    drop(stream);
                    continue;
                }

                let handle = ConnectionHandle(next_handle.fetch_add(1, Ordering::Relaxed));
                shared.metrics.connection_opened();
                let shared = Arc::clone(&shared);
                let events = events.clone();
                tokio::spawn(async move {
                    let task = ConnectionTask::new(handle, peer, stream, Arc::clone(&shared), events);
                    task.run().await;
                    shared.metrics.connection_closed();
                });
            }
        }
    }
}

async fn drain(metrics: &Metrics, limit: Duration) {
    let timeout = tokio::time::sleep(limit);
    tokio::pin!(timeout);

    loop {
        let connections = metrics.snapshot().connections_active;
        if connections == 0 {
            info!("All connections closed, shutting down");
            return;
        }
        tokio::select! {
            _ = &mut timeout => {
                warn!(connections, "Shutdown timeout reached, forcing exit");
                return;
            }
            _ = tokio::time::sleep(Duration::from_millis(50)) => {
                debug!(connections, "Waiting for connections to close");
            }
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

struct ConnectionTask {
    handle: ConnectionHandle,
    peer: SocketAddr,
    conn: Connection,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    shared: Arc<Shared>,
    events: mpsc::Sender<GatewayEvent>,
    outbound_tx: mpsc::Sender<ProtocolFrame>,
    outbound_rx: mpsc::Receiver<ProtocolFrame>,
}

impl ConnectionTask {
    fn new(
        handle: ConnectionHandle,
        peer: SocketAddr,
        stream: TcpStream,
        shared: Arc<Shared>,
        events: mpsc::Sender<GatewayEvent>,
    ) -> Self {
        if let Err(e) = stream.set_nodelay(shared.factory.openwire_options().tcp_no_delay) {
            debug!(conn = %handle, error = %e, "Failed to set TCP_NODELAY");
        }
        let detector = ProtocolDetector::new(
            Arc::clone(&shared.signatures),
            shared.max_buffer_size,
            shared.detection_timeout,
        );
        let (reader, writer) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel(shared.backpressure_limit);
        Self {
            handle,
            peer,
            conn: Connection::new(handle, detector),
            reader,
            writer,
            shared,
            events,
            outbound_tx,
            outbound_rx,
        }
    }

    #[instrument(skip(self), fields(conn = %self.handle, peer = %self.peer))]
    async fn run(mut self) {
        debug!("Connection accepted");
        let mut buf = vec![0u8; self.shared.read_buffer_size];

        loop {
            let flow = if self.conn.is_detecting() {
                let detection_timeout = self.shared.detection_timeout;
                let read = tokio::time::timeout(detection_timeout, self.reader.read(&mut buf)).await;
                match read {
                    Ok(read) => self.on_read(read, &buf).await,
                    Err(_) => self.on_detection_timeout().await,
                }
            } else {
                tokio::select! {
                    read = self.reader.read(&mut buf) => self.on_read(read, &buf).await,
                    Some(frame) = self.outbound_rx.recv() => self.on_outbound(frame).await,
                }
            };
            if let Flow::Stop = flow {
                break;
            }
        }

        self.conn.shutdown();
        let _ = self.writer.shutdown().await;
        let _ = self.events.send(GatewayEvent::Closed { handle: self.handle }).await;
        debug!("Connection finished");
    }

    async fn on_read(&mut self, read: std::io::Result<usize>, buf: &[u8]) -> Flow {
        let n = match read {
            Ok(0) => {
                debug!("Client closed the connection");
                return Flow::Stop;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Socket read failed");
                return Flow::Stop;
            }
        };
        self.shared.metrics.bytes_in(n);

        let supplied = self.conn.supply(&buf[..n], &self.shared.factory);
        for event in supplied.events {
            if let Flow::Stop = self.dispatch(event).await {
                return Flow::Stop;
            }
        }
        if let Some(e) = supplied.error {
            error!(error = %e, "Closing connection after codec failure");
            self.shared.metrics.codec_error();
            return Flow::Stop;
        }
        Flow::Continue
    }

    async fn dispatch(&mut self, event: ConnectionEvent) -> Flow {
        let forwarded = match event {
            ConnectionEvent::Write(bytes) => {
                self.shared.metrics.frame_encoded(bytes.len());
                if let Err(e) = self.writer.write_all(&bytes).await {
                    warn!(error = %e, "Socket write failed");
                    return Flow::Stop;
                }
                return Flow::Continue;
            }
            ConnectionEvent::Detected(protocol) => {
                self.shared.metrics.detection_matched();
                GatewayEvent::Detected {
                    handle: self.handle,
                    peer: self.peer,
                    protocol,
                    outbound: self.outbound_tx.clone(),
                }
            }
            ConnectionEvent::Frame(frame) => {
                self.shared.metrics.frame_decoded();
                GatewayEvent::Frame {
                    handle: self.handle,
                    frame,
                }
            }
            ConnectionEvent::Rejected(reason) => {
                self.reject(reason).await;
                return Flow::Stop;
            }
        };

        if self.events.send(forwarded).await.is_err() {
            warn!("Relay channel closed, dropping connection");
            return Flow::Stop;
        }
        Flow::Continue
    }

    async fn on_detection_timeout(&mut self) -> Flow {
        let reason = match self.conn.check_timeout(Instant::now()) {
            Some(ConnectionEvent::Rejected(reason)) => reason,
            // the socket clock and the detector clock disagree by a hair
            _ => constants::ERR_DETECTION_TIMEOUT,
        };
        self.reject(reason).await;
        Flow::Stop
    }

    async fn reject(&mut self, reason: &'static str) {
        warn!(reason, "Rejecting connection");
        self.shared.metrics.detection_exhausted();
        self.shared.metrics.connection_rejected();
        let _ = self
            .events
            .send(GatewayEvent::Rejected {
                handle: self.handle,
                reason,
            })
            .await;
    }

    async fn on_outbound(&mut self, frame: ProtocolFrame) -> Flow {
        let bytes = match self.conn.encode(&frame) {
            Ok(bytes) => bytes,
            Err(ProtocolError::InvalidData(reason)) if reason == constants::ERR_FRAME_KIND => {
                warn!(reason, "Dropping outbound frame");
                return Flow::Continue;
            }
            Err(e) => {
                error!(error = %e, "Closing connection after encode failure");
                self.shared.metrics.codec_error();
                return Flow::Stop;
            }
        };
        self.shared.metrics.frame_encoded(bytes.len());
        match self.writer.write_all(&bytes).await {
            Ok(()) => Flow::Continue,
            Err(e) => {
                warn!(error = %e, "Socket write failed");
                Flow::Stop
            }
        }
    }
}
