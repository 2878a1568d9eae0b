//! # Protocol Detection
//!
//! Identifies the wire protocol of a new connection from its first bytes.
//!
//! A [`ProtocolDetector`] is created per connection over a shared, ordered
//! list of [`Signature`]s. It buffers arbitrary fragments until one signature
//! matches, every signature mismatches, the buffer limit is reached or the
//! inactivity timeout fires.

pub mod detector;
pub mod signature;

pub use detector::{DetectionState, DetectionStatus, ProtocolDetector};
pub use signature::{builtin, builtin_signatures, protocols, Pattern, Signature, Verdict};
