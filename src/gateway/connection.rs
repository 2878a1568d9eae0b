//! Per-connection pipeline: detection, then a protocol codec.
//!
//! A [`Connection`] is sans-IO. Byte chunks go in through
//! [`Connection::supply`]; what the surrounding transport has to do comes
//! back as [`ConnectionEvent`]s in order.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, info, instrument};

use crate::detecting::detector::{DetectionStatus, ProtocolDetector};
use crate::detecting::signature::protocols;
use crate::error::{constants, ProtocolError, Result};
use crate::openwire::codec::{OpenWireCodec, PassthroughCodec};
use crate::openwire::command::DataStructure;
use crate::openwire::wire_format::WireOptions;

/// Identifier of one transport connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(pub u64);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A decoded unit handed to the relay, or encoded back to the client
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolFrame {
    OpenWire(DataStructure),
    /// Bytes of a protocol without a structured codec
    Raw(Bytes),
}

/// Work produced by feeding bytes to a connection
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Detected(String),
    /// Bytes to write to the client
    Write(Bytes),
    Frame(ProtocolFrame),
    /// Detection failed; the transport must reject the connection
    Rejected(&'static str),
}

/// Result of feeding one chunk to a [`Connection`].
///
/// `events` holds everything produced before `error`, in order. Frames that
/// were fully decoded ahead of a bad one are still delivered.
#[derive(Debug, Default)]
#[must_use]
pub struct Supplied {
    pub events: Vec<ConnectionEvent>,
    /// The failure that closed the connection, if any
    pub error: Option<ProtocolError>,
}

impl Supplied {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// The events, or the error if the chunk failed part way
    pub fn into_result(self) -> Result<Vec<ConnectionEvent>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.events),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    OpenWire,
    Passthrough,
}

/// Codec state of a connection after detection
#[derive(Debug)]
pub enum SessionCodec {
    OpenWire(OpenWireCodec),
    Passthrough(PassthroughCodec),
}

impl SessionCodec {
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ProtocolFrame>> {
        match self {
            SessionCodec::OpenWire(codec) => Ok(codec.decode(buf)?.map(ProtocolFrame::OpenWire)),
            SessionCodec::Passthrough(codec) => Ok(codec.decode(buf)?.map(ProtocolFrame::Raw)),
        }
    }

    pub fn encode(&mut self, frame: &ProtocolFrame, dst: &mut BytesMut) -> Result<()> {
        match (self, frame) {
            (SessionCodec::OpenWire(codec), ProtocolFrame::OpenWire(command)) => {
                codec.encode(command, dst)
            }
            (SessionCodec::Passthrough(codec), ProtocolFrame::Raw(bytes)) => {
                codec.encode(bytes.clone(), dst)
            }
            _ => Err(ProtocolError::InvalidData(constants::ERR_FRAME_KIND)),
        }
    }
}

/// Chooses the codec for a detected protocol
#[derive(Debug, Clone)]
pub struct CodecFactory {
    codecs: HashMap<String, CodecKind>,
    openwire: WireOptions,
}

impl CodecFactory {
    /// Factory with OpenWire decoding and passthrough for the other built-ins
    pub fn new(openwire: WireOptions) -> Self {
        let codecs = [
            (protocols::OPENWIRE, CodecKind::OpenWire),
            (protocols::STOMP, CodecKind::Passthrough),
            (protocols::MQTT, CodecKind::Passthrough),
            (protocols::AMQP, CodecKind::Passthrough),
            (protocols::HTTP, CodecKind::Passthrough),
        ]
        .into_iter()
        .map(|(name, kind)| (name.to_string(), kind))
        .collect();
        Self { codecs, openwire }
    }

    pub fn register(&mut self, protocol: impl Into<String>, kind: CodecKind) {
        self.codecs.insert(protocol.into(), kind);
    }

    pub fn kind(&self, protocol: &str) -> Option<CodecKind> {
        self.codecs.get(protocol).copied()
    }

    pub fn openwire_options(&self) -> &WireOptions {
        &self.openwire
    }

    pub fn create(&self, protocol: &str) -> Result<SessionCodec> {
        match self.kind(protocol) {
            Some(CodecKind::OpenWire) => Ok(SessionCodec::OpenWire(
                OpenWireCodec::for_negotiation(self.openwire.clone())?,
            )),
            Some(CodecKind::Passthrough) => Ok(SessionCodec::Passthrough(PassthroughCodec::new())),
            None => Err(ProtocolError::NoCodec(protocol.to_string())),
        }
    }
}

#[derive(Debug)]
enum Phase {
    Detecting(ProtocolDetector),
    Active { protocol: String, codec: SessionCodec },
    Closed,
}

#[derive(Debug)]
pub struct Connection {
    handle: ConnectionHandle,
    phase: Phase,
    /// Bytes received but not yet forming a complete frame
    inbound: BytesMut,
}

impl Connection {
    pub fn new(handle: ConnectionHandle, detector: ProtocolDetector) -> Self {
        Self {
            handle,
            phase: Phase::Detecting(detector),
            inbound: BytesMut::new(),
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    pub fn protocol(&self) -> Option<&str> {
        match &self.phase {
            Phase::Active { protocol, .. } => Some(protocol),
            _ => None,
        }
    }

    pub fn is_detecting(&self) -> bool {
        matches!(self.phase, Phase::Detecting(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.phase, Phase::Closed)
    }

    pub fn codec(&self) -> Option<&SessionCodec> {
        match &self.phase {
            Phase::Active { codec, .. } => Some(codec),
            _ => None,
        }
    }

    pub fn supply(&mut self, chunk: &[u8], factory: &CodecFactory) -> Supplied {
        self.supply_at(chunk, factory, Instant::now())
    }

    /// Feed one chunk in arrival order. Any error leaves the connection
    /// closed; events produced before it are still returned.
    #[instrument(skip(self, chunk, factory, now), fields(conn = %self.handle, len = chunk.len()))]
    pub fn supply_at(&mut self, chunk: &[u8], factory: &CodecFactory, now: Instant) -> Supplied {
        let mut events = Vec::new();
        let error = self.process(chunk, factory, now, &mut events).err();
        if error.is_some() {
            self.shutdown();
        }
        Supplied { events, error }
    }

    fn process(
        &mut self,
        chunk: &[u8],
        factory: &CodecFactory,
        now: Instant,
        events: &mut Vec<ConnectionEvent>,
    ) -> Result<()> {
        match &mut self.phase {
            Phase::Closed => return Err(ProtocolError::ConnectionClosed),
            Phase::Active { .. } => self.inbound.extend_from_slice(chunk),
            Phase::Detecting(detector) => match detector.supply_at(chunk, now)? {
                DetectionStatus::NeedMoreData => return Ok(()),
                DetectionStatus::Exhausted(reason) => {
                    self.phase = Phase::Closed;
                    events.push(ConnectionEvent::Rejected(reason));
                    return Ok(());
                }
                DetectionStatus::Matched(protocol) => {
                    let replay = detector.take_buffered()?;
                    self.activate(protocol, replay, factory, events)?;
                }
            },
        }
        self.drain(events)
    }

    fn activate(
        &mut self,
        protocol: String,
        replay: Bytes,
        factory: &CodecFactory,
        events: &mut Vec<ConnectionEvent>,
    ) -> Result<()> {
        let mut codec = factory.create(&protocol)?;
        if let SessionCodec::OpenWire(openwire) = &mut codec {
            // sent before any client frame is decoded, so it goes out unnegotiated
            if let Some(info) = openwire.format().preferred_info() {
                let mut out = BytesMut::new();
                openwire.encode(DataStructure::from(info), &mut out)?;
                events.push(ConnectionEvent::Write(out.freeze()));
            }
        }
        info!(conn = %self.handle, protocol = %protocol, replay = replay.len(), "Connection forwarding");
        events.push(ConnectionEvent::Detected(protocol.clone()));
        self.inbound.extend_from_slice(&replay);
        self.phase = Phase::Active { protocol, codec };
        Ok(())
    }

    fn drain(&mut self, events: &mut Vec<ConnectionEvent>) -> Result<()> {
        if let Phase::Active { codec, .. } = &mut self.phase {
            while let Some(frame) = codec.decode(&mut self.inbound)? {
                events.push(ConnectionEvent::Frame(frame));
            }
        }
        Ok(())
    }

    /// Encode a frame produced by the backend for this client
    pub fn encode(&mut self, frame: &ProtocolFrame) -> Result<Bytes> {
        match &mut self.phase {
            Phase::Active { codec, .. } => {
                let mut out = BytesMut::new();
                codec.encode(frame, &mut out)?;
                Ok(out.freeze())
            }
            Phase::Detecting(_) => Err(ProtocolError::InvalidData(constants::ERR_CODEC_NOT_READY)),
            Phase::Closed => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Exhaust detection if the inactivity timeout elapsed
    pub fn check_timeout(&mut self, now: Instant) -> Option<ConnectionEvent> {
        let Phase::Detecting(detector) = &mut self.phase else {
            return None;
        };
        match detector.check_timeout(now)? {
            DetectionStatus::Exhausted(reason) => {
                self.phase = Phase::Closed;
                Some(ConnectionEvent::Rejected(reason))
            }
            _ => None,
        }
    }

    /// Drop the session state; later input is refused
    pub fn shutdown(&mut self) {
        if !self.is_closed() {
            debug!(conn = %self.handle, "Connection session dropped");
        }
        self.phase = Phase::Closed;
        self.inbound.clear();
    }
}
