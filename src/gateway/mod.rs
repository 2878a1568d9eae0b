//! # Gateway
//!
//! Multiplexes many client connections over one detector configuration.
//!
//! The gateway is driven by its caller: raw chunks come in through
//! [`Gateway::supply`], decoded frames leave through the [`Relay`], and
//! client-bound bytes leave through the [`Transport`]. A failure on one
//! connection closes that connection only.
//!
//! ## Lifecycle
//! ```text
//! open -> supply* -> (detected) -> supply* / encode_and_send* -> close
//!      \-> (exhausted or timed out) -> reject
//! ```

pub mod connection;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, error, info, instrument, warn};

pub use connection::{
    CodecFactory, CodecKind, Connection, ConnectionEvent, ConnectionHandle, ProtocolFrame,
    SessionCodec, Supplied,
};

use crate::config::GatewayConfig;
use crate::detecting::detector::ProtocolDetector;
use crate::detecting::signature::Signature;
use crate::error::{constants, ProtocolError, Result};
use crate::utils::metrics::Metrics;

/// Client-facing side of the gateway
pub trait Transport: Send + Sync {
    /// Queue bytes for the client
    fn write(&self, handle: ConnectionHandle, bytes: Bytes) -> Result<()>;

    /// Close a connection whose session ended or failed
    fn close(&self, handle: ConnectionHandle);

    /// Refuse a connection whose protocol could not be detected
    fn reject(&self, handle: ConnectionHandle, reason: &'static str);
}

/// Backend-facing side of the gateway
pub trait Relay: Send + Sync {
    fn on_command_decoded(&self, handle: ConnectionHandle, frame: ProtocolFrame) -> Result<()>;

    fn on_protocol_detected(&self, _handle: ConnectionHandle, _protocol: &str) {}

    fn on_connection_closed(&self, _handle: ConnectionHandle) {}
}

/// Shared detection signatures and codec factory for a configuration.
///
/// Protocols registered through configuration without a structured codec
/// are relayed as raw bytes.
pub(crate) fn pipeline(config: &GatewayConfig) -> Result<(Arc<[Signature]>, CodecFactory)> {
    let signatures: Arc<[Signature]> = config.detection.signatures()?.into();
    let mut factory = CodecFactory::new(config.openwire.wire_options());
    for sig in signatures.iter() {
        if factory.kind(sig.protocol()).is_none() {
            factory.register(sig.protocol(), CodecKind::Passthrough);
        }
    }
    Ok((signatures, factory))
}

pub struct Gateway<T: Transport, R: Relay> {
    transport: T,
    relay: R,
    signatures: Arc<[Signature]>,
    factory: CodecFactory,
    max_buffer_size: usize,
    detection_timeout: Duration,
    connections: HashMap<ConnectionHandle, Connection>,
    metrics: Arc<Metrics>,
}

impl<T: Transport, R: Relay> Gateway<T, R> {
    /// Build a gateway from validated configuration
    pub fn new(config: &GatewayConfig, transport: T, relay: R) -> Result<Self> {
        config.validate_strict()?;
        let (signatures, factory) = pipeline(config)?;
        Ok(Self {
            transport,
            relay,
            signatures,
            factory,
            max_buffer_size: config.detection.max_buffer_size,
            detection_timeout: config.detection.timeout,
            connections: HashMap::new(),
            metrics: Arc::new(Metrics::new()),
        })
    }

    /// Share a metrics collector with other front ends
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn relay(&self) -> &R {
        &self.relay
    }

    pub fn codec_factory_mut(&mut self) -> &mut CodecFactory {
        &mut self.factory
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_open(&self, handle: ConnectionHandle) -> bool {
        self.connections.contains_key(&handle)
    }

    /// Detected protocol of an open connection
    pub fn protocol_of(&self, handle: ConnectionHandle) -> Option<&str> {
        self.connections.get(&handle).and_then(Connection::protocol)
    }

    pub fn open(&mut self, handle: ConnectionHandle) -> Result<()> {
        self.open_at(handle, Instant::now())
    }

    /// Start detection for a new connection; its inactivity clock starts at `now`
    pub fn open_at(&mut self, handle: ConnectionHandle, now: Instant) -> Result<()> {
        if self.connections.contains_key(&handle) {
            return Err(ProtocolError::InvalidData(constants::ERR_DUPLICATE_CONNECTION));
        }
        let detector = ProtocolDetector::new_at(
            Arc::clone(&self.signatures),
            self.max_buffer_size,
            self.detection_timeout,
            now,
        );
        self.connections.insert(handle, Connection::new(handle, detector));
        self.metrics.connection_opened();
        debug!(conn = %handle, "Connection opened");
        Ok(())
    }

    pub fn supply(&mut self, handle: ConnectionHandle, chunk: &[u8]) -> Result<()> {
        self.supply_at(handle, chunk, Instant::now())
    }

    /// Feed a chunk received from the client.
    ///
    /// An error means the connection was closed; the gateway keeps serving
    /// every other connection.
    #[instrument(skip(self, chunk, now), fields(conn = %handle, len = chunk.len()))]
    pub fn supply_at(&mut self, handle: ConnectionHandle, chunk: &[u8], now: Instant) -> Result<()> {
        let conn = self
            .connections
            .get_mut(&handle)
            .ok_or(ProtocolError::UnknownConnection(handle.0))?;
        self.metrics.bytes_in(chunk.len());

        let supplied = conn.supply_at(chunk, &self.factory, now);

        // frames decoded ahead of a failure are still relayed
        for event in supplied.events {
            if let Err(e) = self.dispatch(handle, event) {
                warn!(conn = %handle, error = %e, "Closing connection after relay failure");
                self.teardown(handle);
                return Err(e);
            }
        }
        if let Some(e) = supplied.error {
            error!(conn = %handle, error = %e, "Closing connection after codec failure");
            self.metrics.codec_error();
            self.teardown(handle);
            return Err(e);
        }
        Ok(())
    }

    fn dispatch(&mut self, handle: ConnectionHandle, event: ConnectionEvent) -> Result<()> {
        match event {
            ConnectionEvent::Detected(protocol) => {
                self.metrics.detection_matched();
                self.relay.on_protocol_detected(handle, &protocol);
            }
            ConnectionEvent::Write(bytes) => {
                self.metrics.frame_encoded(bytes.len());
                self.transport.write(handle, bytes)?;
            }
            ConnectionEvent::Frame(frame) => {
                self.metrics.frame_decoded();
                self.relay.on_command_decoded(handle, frame)?;
            }
            ConnectionEvent::Rejected(reason) => self.reject(handle, reason),
        }
        Ok(())
    }

    /// Encode a backend frame for a client and hand it to the transport
    pub fn encode_and_send(&mut self, handle: ConnectionHandle, frame: &ProtocolFrame) -> Result<()> {
        let conn = self
            .connections
            .get_mut(&handle)
            .ok_or(ProtocolError::UnknownConnection(handle.0))?;
        let bytes = match conn.encode(frame) {
            Ok(bytes) => bytes,
            // refused before the codec was touched; the session stays intact
            Err(ProtocolError::InvalidData(reason))
                if reason == constants::ERR_FRAME_KIND || reason == constants::ERR_CODEC_NOT_READY =>
            {
                return Err(ProtocolError::InvalidData(reason))
            }
            Err(e) => {
                error!(conn = %handle, error = %e, "Closing connection after encode failure");
                self.metrics.codec_error();
                self.teardown(handle);
                return Err(e);
            }
        };
        self.metrics.frame_encoded(bytes.len());
        self.transport.write(handle, bytes)
    }

    /// Reject every connection whose detection timed out; returns their handles
    pub fn check_timeouts(&mut self, now: Instant) -> Vec<ConnectionHandle> {
        let mut rejected = Vec::new();
        for (handle, conn) in self.connections.iter_mut() {
            if let Some(ConnectionEvent::Rejected(_)) = conn.check_timeout(now) {
                rejected.push(*handle);
            }
        }
        rejected.sort();
        for handle in &rejected {
            self.reject(*handle, constants::ERR_DETECTION_TIMEOUT);
        }
        rejected
    }

    /// Close a connection at the transport's request
    pub fn close(&mut self, handle: ConnectionHandle) -> Result<()> {
        let mut conn = self
            .connections
            .remove(&handle)
            .ok_or(ProtocolError::UnknownConnection(handle.0))?;
        conn.shutdown();
        self.metrics.connection_closed();
        self.relay.on_connection_closed(handle);
        info!(conn = %handle, "Connection closed");
        Ok(())
    }

    fn reject(&mut self, handle: ConnectionHandle, reason: &'static str) {
        if self.connections.remove(&handle).is_some() {
            self.metrics.detection_exhausted();
            self.metrics.connection_rejected();
            self.metrics.connection_closed();
            self.transport.reject(handle, reason);
        }
    }

    fn teardown(&mut self, handle: ConnectionHandle) {
        if let Some(mut conn) = self.connections.remove(&handle) {
            conn.shutdown();
            self.metrics.connection_closed();
            self.relay.on_connection_closed(handle);
            self.transport.close(handle);
        }
    }
}
