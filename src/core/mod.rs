//! # Core Codec Components
//!
//! Byte- and bit-level building blocks shared by every wire format.
//!
//! ## Components
//! - **DataStream**: big-endian readers and writers with underrun checks
//! - **BooleanStream**: bit-packed presence flags for the tight encoding
//!
//! ## Security
//! - Every read is length-checked before it touches the buffer
//! - Length prefixes are validated before allocation

pub mod boolean_stream;
pub mod data_stream;

pub use boolean_stream::BooleanStream;
pub use data_stream::{DataInput, DataOutput};
