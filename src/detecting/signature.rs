//! Protocol signatures matched against the first bytes of a connection.

use std::fmt;

use regex::bytes::{Regex, RegexBuilder};

use crate::error::{ProtocolError, Result};

/// Names of the protocols with built-in signatures
pub mod protocols {
    pub const OPENWIRE: &str = "openwire";
    pub const STOMP: &str = "stomp";
    pub const MQTT: &str = "mqtt";
    pub const AMQP: &str = "amqp";
    pub const HTTP: &str = "http";
}

/// Outcome of testing one signature against the buffered prologue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    NeedMoreData,
    Match,
    Mismatch,
}

#[derive(Clone)]
pub enum Pattern {
    /// Literal prefix; mismatches as soon as one buffered byte differs
    Prefix(Vec<u8>),
    /// Regular expression anchored at the first byte
    Regex(Regex),
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Prefix(bytes) => f.debug_tuple("Prefix").field(&bytes.escape_ascii().to_string()).finish(),
            Pattern::Regex(regex) => f.debug_tuple("Regex").field(&regex.as_str()).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Signature {
    protocol: String,
    pattern: Pattern,
    min_bytes: usize,
}

impl Signature {
    /// Signature matching a literal byte prefix
    pub fn prefix(protocol: impl Into<String>, prefix: impl Into<Vec<u8>>) -> Result<Self> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(ProtocolError::ConfigError(
                "Signature prefix must not be empty".to_string(),
            ));
        }
        Ok(Self {
            protocol: protocol.into(),
            min_bytes: prefix.len(),
            pattern: Pattern::Prefix(prefix),
        })
    }

    /// Signature matching a byte regex once `min_bytes` are buffered.
    ///
    /// The expression is anchored at the start of the stream, `.` matches any
    /// byte and escapes such as `\x01` denote raw bytes.
    pub fn regex(protocol: impl Into<String>, pattern: &str, min_bytes: usize) -> Result<Self> {
        if min_bytes == 0 {
            return Err(ProtocolError::ConfigError(
                "Signature min_bytes must be at least 1".to_string(),
            ));
        }
        let regex = RegexBuilder::new(&format!("^(?:{pattern})"))
            .unicode(false)
            .dot_matches_new_line(true)
            .build()
            .map_err(|e| ProtocolError::ConfigError(format!("Invalid signature regex: {e}")))?;
        Ok(Self {
            protocol: protocol.into(),
            pattern: Pattern::Regex(regex),
            min_bytes,
        })
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Bytes that must be buffered before a regex verdict is reached
    pub fn min_bytes(&self) -> usize {
        self.min_bytes
    }

    /// Test the buffered prologue
    pub fn check(&self, buffered: &[u8]) -> Verdict {
        match &self.pattern {
            Pattern::Prefix(prefix) => {
                let n = buffered.len().min(prefix.len());
                if buffered[..n] != prefix[..n] {
                    Verdict::Mismatch
                } else if n == prefix.len() {
                    Verdict::Match
                } else {
                    Verdict::NeedMoreData
                }
            }
            Pattern::Regex(regex) => {
                if buffered.len() < self.min_bytes {
                    Verdict::NeedMoreData
                } else if regex.is_match(buffered) {
                    Verdict::Match
                } else {
                    Verdict::Mismatch
                }
            }
        }
    }
}

/// Signatures registered when no protocols are configured, in priority order
pub fn builtin_signatures() -> Result<Vec<Signature>> {
    Ok(vec![
        builtin(protocols::OPENWIRE)?,
        builtin(protocols::STOMP)?,
        builtin(protocols::MQTT)?,
        builtin(protocols::AMQP)?,
        builtin(protocols::HTTP)?,
    ])
}

/// Built-in signature for a protocol name
pub fn builtin(protocol: &str) -> Result<Signature> {
    match protocol {
        // size prefix, WireFormatInfo type code, magic
        protocols::OPENWIRE => Signature::regex(protocol, r".{4}\x01ActiveMQ", 13),
        // long enough to see the line ending after CONNECT
        protocols::STOMP => Signature::regex(protocol, r"(?:CONNECT|STOMP)\r?\n", 9),
        // CONNECT packet, remaining length varint, protocol name
        protocols::MQTT => Signature::regex(
            protocol,
            r"\x10[\x80-\xff]{0,3}[\x00-\x7f]\x00(?:\x04MQTT|\x06MQIsdp)",
            13,
        ),
        protocols::AMQP => Signature::prefix(protocol, &b"AMQP"[..]),
        protocols::HTTP => Signature::regex(
            protocol,
            r"(?:GET|HEAD|POST|PUT|DELETE|OPTIONS|TRACE|PATCH|CONNECT) ",
            8,
        ),
        other => Err(ProtocolError::NoCodec(other.to_string())),
    }
}
