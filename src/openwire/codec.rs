//! # Stream Codecs
//!
//! `tokio_util` codecs for the protocols a connection can be handed to after
//! detection.
//!
//! [`OpenWireCodec`] frames OpenWire on its size prefix and never parses a
//! partial frame: `decode` returns `Ok(None)` until every byte of the next
//! frame is buffered. [`PassthroughCodec`] forwards the raw byte stream of
//! protocols that have no structured codec in the gateway.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{BytesCodec, Decoder, Encoder};
use tracing::{debug, warn};

use crate::error::{ProtocolError, Result};
use crate::openwire::command::DataStructure;
use crate::openwire::wire_format::{OpenWireFormat, WireOptions};

/// Size-prefixed OpenWire framing over an owned [`OpenWireFormat`]
#[derive(Debug)]
pub struct OpenWireCodec {
    format: OpenWireFormat,
    auto_negotiate: bool,
}

impl OpenWireCodec {
    /// Codec over a wire format whose options are already fixed
    pub fn new(format: OpenWireFormat) -> Self {
        Self {
            format,
            auto_negotiate: false,
        }
    }

    /// Codec that negotiates on the first `WireFormatInfo` it decodes.
    ///
    /// The preferred info must be sent to the peer before that happens, so
    /// that it still goes out in the pre-negotiation encoding.
    pub fn for_negotiation(preferred: WireOptions) -> Result<Self> {
        Ok(Self {
            format: OpenWireFormat::for_negotiation(preferred)?,
            auto_negotiate: true,
        })
    }

    pub fn format(&self) -> &OpenWireFormat {
        &self.format
    }

    pub fn format_mut(&mut self) -> &mut OpenWireFormat {
        &mut self.format
    }

    pub fn into_format(self) -> OpenWireFormat {
        self.format
    }
}

impl Decoder for OpenWireCodec {
    type Item = DataStructure;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let Some(frame_len) = self.format.frame_length(src)? else {
            return Ok(None);
        };
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(frame_len);
        let command = self.format.unmarshal(&frame)?;

        if self.auto_negotiate && !self.format.is_negotiated() {
            if let DataStructure::WireFormatInfo(info) = &command {
                self.format.negotiate(info)?;
            } else {
                warn!(
                    name = command.name(),
                    "Command received before wire format negotiation"
                );
            }
        }
        Ok(Some(command))
    }
}

impl Encoder<DataStructure> for OpenWireCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: DataStructure, dst: &mut BytesMut) -> Result<()> {
        Encoder::<&DataStructure>::encode(self, &item, dst)
    }
}

impl Encoder<&DataStructure> for OpenWireCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &DataStructure, dst: &mut BytesMut) -> Result<()> {
        let frame = self.format.marshal(item)?;
        debug!(name = item.name(), len = frame.len(), "Encoded command");
        dst.extend_from_slice(&frame);
        Ok(())
    }
}

/// Raw byte forwarding for protocols without a structured codec
#[derive(Debug, Default)]
pub struct PassthroughCodec {
    inner: BytesCodec,
}

impl PassthroughCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for PassthroughCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        Ok(self.inner.decode(src)?.map(BytesMut::freeze))
    }
}

impl Encoder<Bytes> for PassthroughCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        Ok(self.inner.encode(item, dst)?)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::openwire::command::{BaseCommand, KeepAliveInfo, Response};

    fn keep_alive(id: i32) -> DataStructure {
        KeepAliveInfo {
            base: BaseCommand {
                command_id: id,
                response_required: false,
            },
        }
        .into()
    }

    #[test]
    fn test_decode_waits_for_whole_frame() {
        let mut encoder = OpenWireCodec::new(OpenWireFormat::default());
        let mut wire = BytesMut::new();
        encoder.encode(keep_alive(1), &mut wire).unwrap();

        let mut decoder = OpenWireCodec::new(OpenWireFormat::default());
        let mut partial = BytesMut::from(&wire[..wire.len() - 1]);
        assert!(decoder.decode(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), wire.len() - 1);

        partial.extend_from_slice(&wire[wire.len() - 1..]);
        assert_eq!(decoder.decode(&mut partial).unwrap(), Some(keep_alive(1)));
        assert!(partial.is_empty());
    }

    #[test]
    fn test_decode_multiple_frames_in_order() {
        let mut encoder = OpenWireCodec::new(OpenWireFormat::default());
        let mut wire = BytesMut::new();
        for id in 0..3 {
            encoder.encode(keep_alive(id), &mut wire).unwrap();
        }
        encoder
            .encode(
                DataStructure::from(Response {
                    base: BaseCommand::default(),
                    correlation_id: 7,
                }),
                &mut wire,
            )
            .unwrap();

        let mut decoder = OpenWireCodec::new(OpenWireFormat::default());
        for id in 0..3 {
            assert_eq!(decoder.decode(&mut wire).unwrap(), Some(keep_alive(id)));
        }
        assert!(matches!(
            decoder.decode(&mut wire).unwrap(),
            Some(DataStructure::Response(r)) if r.correlation_id == 7
        ));
        assert!(decoder.decode(&mut wire).unwrap().is_none());
    }

    #[test]
    fn test_auto_negotiation_switches_encoding() {
        let mut gateway = OpenWireCodec::for_negotiation(WireOptions::preferred()).unwrap();
        let mut client = OpenWireCodec::for_negotiation(WireOptions::preferred()).unwrap();

        let mut to_client = BytesMut::new();
        let info = gateway.format().preferred_info().unwrap();
        gateway.encode(DataStructure::from(info), &mut to_client).unwrap();

        let mut to_gateway = BytesMut::new();
        let info = client.format().preferred_info().unwrap();
        client.encode(DataStructure::from(info), &mut to_gateway).unwrap();

        assert!(gateway.decode(&mut to_gateway).unwrap().is_some());
        assert!(client.decode(&mut to_client).unwrap().is_some());
        assert!(gateway.format().is_tight_encoding_enabled());
        assert!(client.format().is_cache_enabled());

        client.encode(keep_alive(9), &mut to_gateway).unwrap();
        assert_eq!(gateway.decode(&mut to_gateway).unwrap(), Some(keep_alive(9)));
    }

    #[test]
    fn test_passthrough_forwards_bytes() {
        let mut codec = PassthroughCodec::new();
        let mut buf = BytesMut::from(&b"CONNECT\n"[..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Bytes::from_static(b"CONNECT\n"))
        );
        assert!(codec.decode(&mut buf).unwrap().is_none());

        let mut out = BytesMut::new();
        codec.encode(Bytes::from_static(b"OK"), &mut out).unwrap();
        assert_eq!(&out[..], b"OK");
    }
}
