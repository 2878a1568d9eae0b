//! # Boolean Stream
//!
//! Bit-packed presence flags for the tight encoding.
//!
//! Pass one of a tight marshal records one bit per optional field (and the
//! width class of every long) in traversal order. The stream is written in
//! front of the payload, rewound, and pass two consumes the same bits in the
//! same order. The decoder reads the prefix back and consumes bit for bit.
//!
//! ## Wire Format
//! ```text
//! len < 64   : [len(1)]            [bits(len)]
//! len < 256  : [0xC0] [len(1)]     [bits(len)]
//! otherwise  : [0x80] [len(2, BE)] [bits(len)]
//! ```
//! Bits are packed least significant bit first; the final byte is zero padded.

use crate::core::data_stream::{DataInput, DataOutput};
use crate::error::{constants, ProtocolError, Result};

const SHORT_LENGTH_MARKER: u8 = 0xC0;
const WIDE_LENGTH_MARKER: u8 = 0x80;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BooleanStream {
    data: Vec<u8>,
    /// Total bits written (or available after unmarshal)
    bit_len: usize,
    /// Read cursor, in bits
    read_pos: usize,
}

impl BooleanStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one bit
    pub fn write_boolean(&mut self, value: bool) -> Result<()> {
        let byte = self.bit_len / 8;
        if byte >= u16::MAX as usize {
            return Err(ProtocolError::InvalidData(
                constants::ERR_BOOLEAN_STREAM_TOO_LARGE,
            ));
        }
        if byte == self.data.len() {
            self.data.push(0);
        }
        if value {
            self.data[byte] |= 1 << (self.bit_len % 8);
        }
        self.bit_len += 1;
        Ok(())
    }

    /// Pop the next bit in write order
    pub fn read_boolean(&mut self) -> Result<bool> {
        if self.read_pos >= self.bit_len {
            return Err(ProtocolError::BitStreamUnderrun);
        }
        let bit = (self.data[self.read_pos / 8] >> (self.read_pos % 8)) & 0x01;
        self.read_pos += 1;
        Ok(bit != 0)
    }

    /// Whether whole bytes remain past the read cursor. A stream from a
    /// conforming encoder is consumed up to its final padded byte.
    pub fn has_unread_bytes(&self) -> bool {
        self.read_pos.div_ceil(8) < self.data.len()
    }

    /// Rewind the read cursor to the first bit
    pub fn reset(&mut self) {
        self.read_pos = 0;
    }

    pub fn bits_written(&self) -> usize {
        self.bit_len
    }

    pub fn bits_read(&self) -> usize {
        self.read_pos
    }

    /// Bytes `marshal` will write, length prefix included
    pub fn marshalled_size(&self) -> usize {
        let len = self.data.len();
        if len < 64 {
            1 + len
        } else if len < 256 {
            2 + len
        } else {
            3 + len
        }
    }

    pub fn marshal(&self, out: &mut DataOutput) {
        let len = self.data.len();
        if len < 64 {
            out.write_u8(len as u8);
        } else if len < 256 {
            out.write_u8(SHORT_LENGTH_MARKER);
            out.write_u8(len as u8);
        } else {
            out.write_u8(WIDE_LENGTH_MARKER);
            out.write_u16(len as u16);
        }
        out.write_bytes(&self.data);
    }

    /// Read a stream written by [`BooleanStream::marshal`].
    ///
    /// The bit count is rounded up to whole bytes; padding bits read as
    /// `false` and only a read past the last byte is an underrun.
    pub fn unmarshal(input: &mut DataInput<'_>) -> Result<Self> {
        let len = match input.read_u8()? {
            SHORT_LENGTH_MARKER => input.read_u8()? as usize,
            WIDE_LENGTH_MARKER => input.read_u16()? as usize,
            len => len as usize,
        };
        let data = input.read_bytes(len)?.to_vec();
        Ok(Self {
            bit_len: data.len() * 8,
            data,
            read_pos: 0,
        })
    }
}
