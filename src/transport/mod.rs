//! # Transport Layer
//!
//! Socket front ends that feed the gateway pipeline.
//!
//! ## Components
//! - **TCP**: tokio listener with one task per connection, graceful shutdown

pub mod tcp;

pub use tcp::{serve, start_server, start_server_with_shutdown, GatewayEvent};
