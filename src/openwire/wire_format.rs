//! # OpenWire Wire Format
//!
//! Per-session encoder/decoder. Owns the negotiated options, the marshaller
//! registry for the negotiated version, and both reference caches.
//!
//! ## Frame Layout
//! ```text
//! tight: [size(4)] [type(1)] [boolean stream: len prefix + bits] [payload]
//! loose: [size(4)] [type(1)] [payload]
//! ```
//! `size` counts every byte after itself and is omitted when the session
//! negotiated `SizePrefixDisabled`.
//!
//! ## Negotiation
//! A session starts loose, uncached and size-prefixed so the opening
//! `WireFormatInfo` is readable by any peer. [`OpenWireFormat::negotiate`]
//! combines the peer's info with the local preference exactly once; the
//! options are then fixed for the lifetime of the session.

use bytes::Bytes;
use tracing::{debug, info, instrument};

use crate::core::boolean_stream::BooleanStream;
use crate::core::data_stream::{DataInput, DataOutput};
use crate::error::{constants, ProtocolError, Result};
use crate::openwire::cache::{MarshalCache, UnmarshalCache, DEFAULT_CACHE_SIZE, MAX_CACHE_SIZE};
use crate::openwire::command::{DataStructure, WireFormatInfo, OPENWIRE_MAGIC};
use crate::openwire::marshal::DataStreamMarshaller;
use crate::openwire::primitive_map::{PrimitiveMap, PrimitiveValue};
use crate::openwire::registry::{Registry, MAX_SUPPORTED_VERSION};

/// Default upper bound on a single frame (100 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Limit on nested objects and exception causes within one frame
const MAX_NESTING: usize = 32;

/// Property names carried in `WireFormatInfo`
pub mod property {
    pub const TIGHT_ENCODING_ENABLED: &str = "TightEncodingEnabled";
    pub const CACHE_ENABLED: &str = "CacheEnabled";
    pub const CACHE_SIZE: &str = "CacheSize";
    pub const SIZE_PREFIX_DISABLED: &str = "SizePrefixDisabled";
    pub const STACK_TRACE_ENABLED: &str = "StackTraceEnabled";
    pub const TCP_NO_DELAY_ENABLED: &str = "TcpNoDelayEnabled";
    pub const MAX_FRAME_SIZE: &str = "MaxFrameSize";
    pub const MAX_INACTIVITY_DURATION: &str = "MaxInactivityDuration";
    pub const MAX_INACTIVITY_DURATION_INITIAL_DELAY: &str = "MaxInactivityDurationInitalDelay";
}

/// Encoding options of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireOptions {
    pub version: u32,
    pub tight_encoding: bool,
    pub cache_enabled: bool,
    pub cache_size: usize,
    pub size_prefix_disabled: bool,
    pub stack_trace_enabled: bool,
    pub tcp_no_delay: bool,
    pub max_frame_size: usize,
    /// Milliseconds; 0 disables inactivity monitoring
    pub max_inactivity_duration: i64,
    pub max_inactivity_initial_delay: i64,
}

impl Default for WireOptions {
    /// Options in force before negotiation
    fn default() -> Self {
        Self {
            version: MAX_SUPPORTED_VERSION,
            tight_encoding: false,
            cache_enabled: false,
            cache_size: DEFAULT_CACHE_SIZE,
            size_prefix_disabled: false,
            stack_trace_enabled: false,
            tcp_no_delay: false,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_inactivity_duration: 30_000,
            max_inactivity_initial_delay: 10_000,
        }
    }
}

impl WireOptions {
    /// Options for a session that wants every optimisation
    pub fn preferred() -> Self {
        Self {
            tight_encoding: true,
            cache_enabled: true,
            stack_trace_enabled: true,
            tcp_no_delay: true,
            ..Self::default()
        }
    }

    /// Build the handshake command advertising these options
    pub fn to_info(&self) -> WireFormatInfo {
        let mut props = PrimitiveMap::new();
        let mut flag = |key: &str, value: bool| {
            props.insert(key.to_string(), PrimitiveValue::Boolean(value));
        };
        flag(property::TIGHT_ENCODING_ENABLED, self.tight_encoding);
        flag(property::CACHE_ENABLED, self.cache_enabled);
        flag(property::SIZE_PREFIX_DISABLED, self.size_prefix_disabled);
        flag(property::STACK_TRACE_ENABLED, self.stack_trace_enabled);
        flag(property::TCP_NO_DELAY_ENABLED, self.tcp_no_delay);
        props.insert(
            property::CACHE_SIZE.to_string(),
            PrimitiveValue::Int(self.cache_size as i32),
        );
        props.insert(
            property::MAX_FRAME_SIZE.to_string(),
            PrimitiveValue::Long(self.max_frame_size as i64),
        );
        props.insert(
            property::MAX_INACTIVITY_DURATION.to_string(),
            PrimitiveValue::Long(self.max_inactivity_duration),
        );
        props.insert(
            property::MAX_INACTIVITY_DURATION_INITIAL_DELAY.to_string(),
            PrimitiveValue::Long(self.max_inactivity_initial_delay),
        );

        WireFormatInfo {
            magic: OPENWIRE_MAGIC,
            version: self.version as i32,
            properties: Some(props),
        }
    }

    /// Read a peer's advertised options; absent flags count as disabled
    pub fn from_info(info: &WireFormatInfo) -> Result<Self> {
        if !info.is_valid() {
            return Err(ProtocolError::InvalidData(constants::ERR_BAD_MAGIC));
        }
        if info.version < 1 {
            return Err(ProtocolError::UnsupportedVersion(info.version.max(0) as u32));
        }
        let empty = PrimitiveMap::new();
        let props = info.properties.as_ref().unwrap_or(&empty);
        let flag = |key: &str| props.get(key).and_then(PrimitiveValue::as_bool).unwrap_or(false);
        let int = |key: &str| props.get(key).and_then(PrimitiveValue::as_i64);
        let defaults = Self::default();

        Ok(Self {
            version: info.version as u32,
            tight_encoding: flag(property::TIGHT_ENCODING_ENABLED),
            cache_enabled: flag(property::CACHE_ENABLED),
            cache_size: int(property::CACHE_SIZE)
                .map(|v| v.clamp(1, MAX_CACHE_SIZE as i64) as usize)
                .unwrap_or(defaults.cache_size),
            size_prefix_disabled: flag(property::SIZE_PREFIX_DISABLED),
            stack_trace_enabled: flag(property::STACK_TRACE_ENABLED),
            tcp_no_delay: flag(property::TCP_NO_DELAY_ENABLED),
            max_frame_size: int(property::MAX_FRAME_SIZE)
                .map(|v| v.max(0) as usize)
                .unwrap_or(defaults.max_frame_size),
            max_inactivity_duration: int(property::MAX_INACTIVITY_DURATION)
                .unwrap_or(defaults.max_inactivity_duration),
            max_inactivity_initial_delay: int(property::MAX_INACTIVITY_DURATION_INITIAL_DELAY)
                .unwrap_or(defaults.max_inactivity_initial_delay),
        })
    }

    /// Combine local and peer options: lowest version, features both sides enable
    pub fn negotiate(&self, peer: &WireOptions) -> WireOptions {
        WireOptions {
            version: self.version.min(peer.version),
            tight_encoding: self.tight_encoding && peer.tight_encoding,
            cache_enabled: self.cache_enabled && peer.cache_enabled,
            cache_size: self.cache_size.min(peer.cache_size),
            size_prefix_disabled: self.size_prefix_disabled && peer.size_prefix_disabled,
            stack_trace_enabled: self.stack_trace_enabled && peer.stack_trace_enabled,
            tcp_no_delay: self.tcp_no_delay && peer.tcp_no_delay,
            max_frame_size: self.max_frame_size.min(peer.max_frame_size),
            max_inactivity_duration: self.max_inactivity_duration.min(peer.max_inactivity_duration),
            max_inactivity_initial_delay: self
                .max_inactivity_initial_delay
                .min(peer.max_inactivity_initial_delay),
        }
    }
}

/// Per-session OpenWire codec state
#[derive(Debug)]
pub struct OpenWireFormat {
    options: WireOptions,
    registry: &'static Registry,
    marshal_cache: MarshalCache,
    unmarshal_cache: UnmarshalCache,
    /// Local preference, present until negotiation consumes it
    preferred: Option<WireOptions>,
    negotiated: bool,
    nesting: usize,
}

impl Default for OpenWireFormat {
    fn default() -> Self {
        let options = WireOptions::default();
        Self {
            registry: Registry::v1(),
            marshal_cache: MarshalCache::new(options.cache_size),
            unmarshal_cache: UnmarshalCache::new(options.cache_size),
            options,
            preferred: None,
            negotiated: false,
            nesting: 0,
        }
    }
}

impl OpenWireFormat {
    /// Wire format with fixed options and no negotiation step
    pub fn new(options: WireOptions) -> Result<Self> {
        let registry = Registry::for_version(options.version)?;
        Ok(Self {
            registry,
            marshal_cache: MarshalCache::new(options.cache_size),
            unmarshal_cache: UnmarshalCache::new(options.cache_size),
            options,
            preferred: None,
            negotiated: true,
            nesting: 0,
        })
    }

    /// Wire format in handshake mode, waiting for the peer's `WireFormatInfo`
    pub fn for_negotiation(preferred: WireOptions) -> Result<Self> {
        Registry::for_version(preferred.version)?;
        Ok(Self {
            preferred: Some(preferred),
            ..Self::default()
        })
    }

    pub fn options(&self) -> &WireOptions {
        &self.options
    }

    pub fn version(&self) -> u32 {
        self.options.version
    }

    pub fn is_negotiated(&self) -> bool {
        self.negotiated
    }

    pub fn is_tight_encoding_enabled(&self) -> bool {
        self.options.tight_encoding
    }

    pub fn is_cache_enabled(&self) -> bool {
        self.options.cache_enabled
    }

    pub fn is_stack_trace_enabled(&self) -> bool {
        self.options.stack_trace_enabled
    }

    pub fn is_size_prefix_disabled(&self) -> bool {
        self.options.size_prefix_disabled
    }

    /// Handshake command to send to the peer, if negotiation is pending
    pub fn preferred_info(&self) -> Option<WireFormatInfo> {
        self.preferred.as_ref().map(WireOptions::to_info)
    }

    /// Apply the peer's `WireFormatInfo`. Allowed once per session.
    #[instrument(skip(self, peer), fields(peer_version = peer.version))]
    pub fn negotiate(&mut self, peer: &WireFormatInfo) -> Result<()> {
        if self.negotiated {
            return Err(ProtocolError::AlreadyNegotiated);
        }
        let preferred = self.preferred.take().unwrap_or_default();
        let options = preferred.negotiate(&WireOptions::from_info(peer)?);

        self.registry = Registry::for_version(options.version)?;
        self.marshal_cache = MarshalCache::new(options.cache_size);
        self.unmarshal_cache = UnmarshalCache::new(options.cache_size);
        self.negotiated = true;
        info!(
            version = options.version,
            tight = options.tight_encoding,
            cache = options.cache_enabled,
            cache_size = options.cache_size,
            "Wire format negotiated"
        );
        self.options = options;
        Ok(())
    }

    /// Encode one data structure into a complete frame
    pub fn marshal(&mut self, command: &DataStructure) -> Result<Bytes> {
        let marshaller = self.registry.get(command.data_structure_type())?;
        self.marshal_with(marshaller, command)
    }

    fn marshal_with(
        &mut self,
        marshaller: &dyn DataStreamMarshaller,
        command: &DataStructure,
    ) -> Result<Bytes> {
        let type_code = command.data_structure_type();
        if self.options.cache_enabled {
            self.marshal_cache.evict_sweep();
        }
        let prefix = if self.options.size_prefix_disabled { 0 } else { 4 };
        // pass 1 and the loose pass count depth exactly as the decoder will
        self.nesting = 0;

        if self.options.tight_encoding {
            let mut bs = BooleanStream::new();
            let payload = marshaller.tight_marshal1(self, command, &mut bs)?;
            let size = 1 + bs.marshalled_size() + payload;
            self.check_frame_size(size)?;

            let mut out = DataOutput::with_capacity(prefix + size);
            if prefix > 0 {
                out.write_i32(size as i32);
            }
            out.write_u8(type_code);
            bs.marshal(&mut out);
            bs.reset();
            marshaller.tight_marshal2(self, command, &mut out, &mut bs)?;

            if out.len() != prefix + size {
                return Err(ProtocolError::MarshalSizeMismatch {
                    expected: size,
                    written: out.len() - prefix,
                });
            }
            if bs.bits_read() != bs.bits_written() {
                return Err(ProtocolError::MarshalBitMismatch {
                    written: bs.bits_written(),
                    read: bs.bits_read(),
                });
            }
            Ok(out.freeze())
        } else {
            let mut out = DataOutput::new();
            if prefix > 0 {
                out.write_i32(0);
            }
            out.write_u8(type_code);
            marshaller.loose_marshal(self, command, &mut out)?;
            if prefix > 0 {
                let size = out.len() - prefix;
                self.check_frame_size(size)?;
                out.patch_i32(0, size as i32);
            }
            Ok(out.freeze())
        }
    }

    /// Decode exactly one complete frame
    pub fn unmarshal(&mut self, frame: &[u8]) -> Result<DataStructure> {
        let mut input = DataInput::new(frame);
        let command = if self.options.size_prefix_disabled {
            self.unmarshal_body(&mut input)?
        } else {
            let size = self.read_size(&mut input)?;
            let mut body = DataInput::new(input.read_bytes(size)?);
            let command = self.unmarshal_body(&mut body)?;
            if body.has_remaining() {
                return Err(ProtocolError::InvalidData(constants::ERR_TRAILING_BYTES));
            }
            command
        };
        if input.has_remaining() {
            return Err(ProtocolError::InvalidData(constants::ERR_TRAILING_BYTES));
        }
        debug!(
            type_code = command.data_structure_type(),
            name = command.name(),
            "Unmarshalled command"
        );
        Ok(command)
    }

    /// Length of the frame at the head of `buf`, once its size prefix is buffered
    pub fn frame_length(&self, buf: &[u8]) -> Result<Option<usize>> {
        if self.options.size_prefix_disabled {
            return Err(ProtocolError::InvalidData(
                constants::ERR_SIZE_PREFIX_REQUIRED,
            ));
        }
        if buf.len() < 4 {
            return Ok(None);
        }
        let size = self.read_size(&mut DataInput::new(&buf[..4]))?;
        Ok(Some(4 + size))
    }

    fn read_size(&self, input: &mut DataInput<'_>) -> Result<usize> {
        let size = input.read_i32()?;
        if size < 0 {
            return Err(ProtocolError::InvalidData(constants::ERR_NEGATIVE_LENGTH));
        }
        let size = size as usize;
        self.check_frame_size(size)?;
        Ok(size)
    }

    fn check_frame_size(&self, size: usize) -> Result<()> {
        if size > self.options.max_frame_size {
            return Err(ProtocolError::OversizedFrame(size));
        }
        Ok(())
    }

    fn unmarshal_body(&mut self, input: &mut DataInput<'_>) -> Result<DataStructure> {
        self.nesting = 0;
        let marshaller = self.registry.get(input.read_u8()?)?;
        let mut command = marshaller.create_object();
        if self.options.tight_encoding {
            let mut bs = BooleanStream::unmarshal(input)?;
            marshaller.tight_unmarshal(self, &mut command, input, &mut bs)?;
            if bs.has_unread_bytes() {
                return Err(ProtocolError::InvalidData(constants::ERR_UNREAD_PRESENCE_BITS));
            }
        } else {
            marshaller.loose_unmarshal(self, &mut command, input)?;
        }
        Ok(command)
    }

    pub(crate) fn registry(&self) -> &'static Registry {
        self.registry
    }

    pub(crate) fn marshal_cache(&self) -> &MarshalCache {
        &self.marshal_cache
    }

    pub(crate) fn marshal_cache_mut(&mut self) -> &mut MarshalCache {
        &mut self.marshal_cache
    }

    pub(crate) fn unmarshal_cache(&self) -> &UnmarshalCache {
        &self.unmarshal_cache
    }

    pub(crate) fn unmarshal_cache_mut(&mut self) -> &mut UnmarshalCache {
        &mut self.unmarshal_cache
    }

    pub(crate) fn enter_nested(&mut self) -> Result<()> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(ProtocolError::InvalidData(constants::ERR_NESTING_TOO_DEEP));
        }
        Ok(())
    }

    pub(crate) fn exit_nested(&mut self) {
        self.nesting = self.nesting.saturating_sub(1);
    }
}
