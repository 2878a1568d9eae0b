//! # OpenWire
//!
//! The message-broker wire format served by the gateway.
//!
//! ## Components
//! - **Command**: the closed set of data structures and their type codes
//! - **Marshal**: the per-variant marshaller contract and shared field encoders
//! - **Registry**: type code to marshaller lookup per protocol version
//! - **Cache**: mirrored encode/decode reference caches
//! - **WireFormat**: per-session options, negotiation, frame marshal/unmarshal
//! - **Codec**: `tokio_util` framing on top of the wire format
//!
//! ## Encodings
//! Tight encoding sizes a frame in a first pass that records presence bits in
//! a [`BooleanStream`](crate::core::BooleanStream), then writes it in a second
//! pass replaying those bits. Loose encoding writes a single self-describing
//! pass with an inline presence byte per optional field.

pub mod cache;
pub mod codec;
pub mod command;
pub mod marshal;
pub mod primitive_map;
pub mod registry;
mod v1;
pub mod wire_format;

pub use codec::{OpenWireCodec, PassthroughCodec};
pub use command::{DataStructure, StructureRef};
pub use registry::Registry;
pub use wire_format::{OpenWireFormat, WireOptions};
