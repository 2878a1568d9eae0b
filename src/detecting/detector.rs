//! # Protocol Detector
//!
//! Buffers the first bytes of a connection until one registered signature
//! identifies the protocol.
//!
//! ## States
//! ```text
//! Buffering -> Matched -> Forwarding
//! Buffering -> Exhausted
//! ```
//! Signatures are evaluated in registration order after every chunk. A
//! mismatching signature leaves the viable set for good; the first signature
//! (in registration order) reporting a match in an evaluation wins. Once
//! matched, [`ProtocolDetector::take_buffered`] hands the buffered prologue
//! over exactly once for replay into the protocol's codec.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, info, warn};

use crate::detecting::signature::{Signature, Verdict};
use crate::error::{constants, ProtocolError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionState {
    Buffering,
    Matched,
    Forwarding,
    Exhausted,
}

/// Result of feeding a chunk to the detector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionStatus {
    NeedMoreData,
    /// Name of the matched protocol
    Matched(String),
    /// Detection failed; the connection has to be rejected
    Exhausted(&'static str),
}

#[derive(Debug)]
pub struct ProtocolDetector {
    signatures: Arc<[Signature]>,
    /// Indices into `signatures` still able to match
    viable: Vec<usize>,
    buffer: BytesMut,
    state: DetectionState,
    matched: Option<usize>,
    exhausted: Option<&'static str>,
    max_buffer_size: usize,
    timeout: Duration,
    last_activity: Instant,
}

impl ProtocolDetector {
    pub fn new(signatures: Arc<[Signature]>, max_buffer_size: usize, timeout: Duration) -> Self {
        Self::new_at(signatures, max_buffer_size, timeout, Instant::now())
    }

    /// Detector whose inactivity clock starts at `now`
    pub fn new_at(
        signatures: Arc<[Signature]>,
        max_buffer_size: usize,
        timeout: Duration,
        now: Instant,
    ) -> Self {
        let viable = (0..signatures.len()).collect();
        Self {
            signatures,
            viable,
            buffer: BytesMut::new(),
            state: DetectionState::Buffering,
            matched: None,
            exhausted: None,
            max_buffer_size,
            timeout,
            last_activity: now,
        }
    }

    pub fn state(&self) -> DetectionState {
        self.state
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Signature that matched, once detection succeeded
    pub fn matched(&self) -> Option<&Signature> {
        self.matched.map(|i| &self.signatures[i])
    }

    pub fn matched_protocol(&self) -> Option<&str> {
        self.matched().map(Signature::protocol)
    }

    /// Append a chunk and re-evaluate the viable signatures
    pub fn supply(&mut self, chunk: &[u8]) -> Result<DetectionStatus> {
        self.supply_at(chunk, Instant::now())
    }

    /// Append a chunk received at `now` and re-evaluate.
    ///
    /// The verdict is independent of chunking as long as at most one
    /// signature matches the prologue. When several do, the winner is the
    /// first to match at whatever chunk boundary the bytes arrive on: a
    /// short signature can claim a prefix that a longer, earlier registered
    /// signature would have won on the whole prologue.
    pub fn supply_at(&mut self, chunk: &[u8], now: Instant) -> Result<DetectionStatus> {
        match self.state {
            DetectionState::Buffering => {}
            DetectionState::Exhausted => {
                return Err(ProtocolError::DetectionExhausted(
                    self.exhausted.unwrap_or(constants::ERR_DETECTION_MISMATCH),
                ))
            }
            DetectionState::Matched | DetectionState::Forwarding => {
                return Err(ProtocolError::DetectionExhausted(constants::ERR_DETECTION_DONE))
            }
        }
        self.last_activity = now;
        self.buffer.extend_from_slice(chunk);

        let buffered = &self.buffer[..];
        let signatures = &self.signatures;
        let mut winner = None;
        self.viable.retain(|&i| match signatures[i].check(buffered) {
            Verdict::Mismatch => false,
            Verdict::Match => {
                winner = winner.or(Some(i));
                true
            }
            Verdict::NeedMoreData => true,
        });

        if let Some(i) = winner {
            self.state = DetectionState::Matched;
            self.matched = Some(i);
            let protocol = self.signatures[i].protocol().to_string();
            info!(
                protocol = %protocol,
                buffered = self.buffer.len(),
                "Protocol detected"
            );
            return Ok(DetectionStatus::Matched(protocol));
        }
        if self.viable.is_empty() {
            return Ok(self.exhaust(constants::ERR_DETECTION_MISMATCH));
        }
        if self.buffer.len() >= self.max_buffer_size {
            return Ok(self.exhaust(constants::ERR_DETECTION_BUFFER_FULL));
        }
        debug!(
            buffered = self.buffer.len(),
            viable = self.viable.len(),
            "Awaiting more detection bytes"
        );
        Ok(DetectionStatus::NeedMoreData)
    }

    /// Exhaust the detector if it has been buffering longer than the timeout
    pub fn check_timeout(&mut self, now: Instant) -> Option<DetectionStatus> {
        if self.state != DetectionState::Buffering {
            return None;
        }
        if now.saturating_duration_since(self.last_activity) < self.timeout {
            return None;
        }
        Some(self.exhaust(constants::ERR_DETECTION_TIMEOUT))
    }

    /// Hand over the buffered prologue and switch to forwarding
    pub fn take_buffered(&mut self) -> Result<Bytes> {
        if self.state != DetectionState::Matched {
            return Err(ProtocolError::DetectionExhausted(constants::ERR_DETECTION_DONE));
        }
        self.state = DetectionState::Forwarding;
        Ok(self.buffer.split().freeze())
    }

    fn exhaust(&mut self, reason: &'static str) -> DetectionStatus {
        warn!(
            reason,
            buffered = self.buffer.len(),
            "Protocol detection exhausted"
        );
        self.state = DetectionState::Exhausted;
        self.exhausted = Some(reason);
        self.viable.clear();
        self.buffer.clear();
        DetectionStatus::Exhausted(reason)
    }
}
