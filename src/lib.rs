//! # openwire-gateway
//!
//! Protocol detection and the OpenWire codec layer of a multiplexing
//! message-broker gateway.
//!
//! A single listening port serves several broker protocols. Each new
//! connection buffers its first bytes until a registered signature
//! identifies the protocol, then hands every byte, buffered ones included,
//! to that protocol's codec. OpenWire connections get a full
//! encoder/decoder with tight and loose encodings, a mirrored reference
//! cache and wire format negotiation.
//!
//! ## Modules
//! - [`core`]: bit and byte streams
//! - [`openwire`]: commands, marshallers, wire format, `tokio_util` codec
//! - [`detecting`]: signatures and the per-connection detector
//! - [`gateway`]: sans-IO connection pipeline behind `Transport`/`Relay` seams
//! - [`transport`]: tokio TCP front end
//! - [`config`], [`error`], [`utils`]: configuration, errors, logging and metrics
//!
//! ## Example
//! ```rust
//! use openwire_gateway::openwire::command::{DataStructure, KeepAliveInfo};
//! use openwire_gateway::openwire::{OpenWireFormat, WireOptions};
//!
//! # fn main() -> openwire_gateway::error::Result<()> {
//! let mut format = OpenWireFormat::new(WireOptions::preferred())?;
//! let frame = format.marshal(&DataStructure::KeepAliveInfo(KeepAliveInfo::default()))?;
//! let decoded = format.unmarshal(&frame)?;
//! assert_eq!(decoded.data_structure_type(), 10);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod detecting;
pub mod error;
pub mod gateway;
pub mod openwire;
pub mod transport;
pub mod utils;

pub use config::GatewayConfig;
pub use detecting::{ProtocolDetector, Signature};
pub use error::{ProtocolError, Result};
pub use gateway::{Connection, ConnectionHandle, Gateway, ProtocolFrame, Relay, Transport};
pub use openwire::{DataStructure, OpenWireCodec, OpenWireFormat, WireOptions};
