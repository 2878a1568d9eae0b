//! # Data Streams
//!
//! Big-endian primitive readers and writers used by every marshaller.
//!
//! `DataOutput` wraps a `BytesMut` so the tight encoder can allocate the
//! exact frame size up front. `DataInput` reads from a borrowed slice and
//! checks every read against the remaining length: input comes straight off
//! the socket, and a short buffer is a `BufferUnderrun`, never a panic.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{constants, ProtocolError, Result};

/// Growable big-endian output buffer
#[derive(Debug, Default)]
pub struct DataOutput {
    buf: BytesMut,
}

impl DataOutput {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Create an output buffer with exactly `capacity` bytes reserved
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    #[inline]
    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    #[inline]
    pub fn write_i16(&mut self, value: i16) {
        self.buf.put_i16(value);
    }

    #[inline]
    pub fn write_u16(&mut self, value: u16) {
        self.buf.put_u16(value);
    }

    #[inline]
    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    #[inline]
    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64(value);
    }

    #[inline]
    pub fn write_bytes(&mut self, value: &[u8]) {
        self.buf.put_slice(value);
    }

    /// Write a string as an unsigned 16-bit length followed by its UTF-8 bytes
    pub fn write_utf(&mut self, value: &str) -> Result<()> {
        let len = value.len();
        if len > u16::MAX as usize {
            return Err(ProtocolError::StringTooLong(len));
        }
        self.buf.put_u16(len as u16);
        self.buf.put_slice(value.as_bytes());
        Ok(())
    }

    /// Overwrite four bytes at `offset` with a big-endian i32.
    ///
    /// Used to back-fill the size prefix of loose frames.
    pub(crate) fn patch_i32(&mut self, offset: usize, value: i32) {
        self.buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes_mut(self) -> BytesMut {
        self.buf
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Bounds-checked big-endian reader over a borrowed frame
#[derive(Debug)]
pub struct DataInput<'a> {
    buf: &'a [u8],
}

impl<'a> DataInput<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn has_remaining(&self) -> bool {
        !self.buf.is_empty()
    }

    #[inline]
    fn ensure(&self, needed: usize) -> Result<()> {
        if self.buf.len() < needed {
            return Err(ProtocolError::BufferUnderrun {
                needed,
                available: self.buf.len(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.ensure(2)?;
        Ok(self.buf.get_i16())
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.ensure(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.ensure(8)?;
        Ok(self.buf.get_i64())
    }

    /// Read exactly `len` bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.ensure(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// Read a signed 32-bit length and that many bytes
    pub fn read_sized_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(ProtocolError::InvalidData(constants::ERR_NEGATIVE_LENGTH));
        }
        self.read_bytes(len as usize)
    }

    /// Read a string written by [`DataOutput::write_utf`]
    pub fn read_utf(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        let raw = self.read_bytes(len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidData(constants::ERR_STRING_NOT_UTF8))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn test_primitives_are_big_endian() {
        let mut out = DataOutput::new();
        out.write_i32(0x0102_0304);
        out.write_i16(-2);
        assert_eq!(out.as_slice(), &[1, 2, 3, 4, 0xFF, 0xFE]);
    }

    #[test]
    fn test_short_read_is_underrun() {
        let mut input = DataInput::new(&[0x00, 0x01]);
        match input.read_i32() {
            Err(ProtocolError::BufferUnderrun { needed, available }) => {
                assert_eq!(needed, 4);
                assert_eq!(available, 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
        // failed read consumes nothing
        assert_eq!(input.read_u16().unwrap(), 1);
    }

    #[test]
    fn test_utf_roundtrip_and_limit() {
        let mut out = DataOutput::new();
        out.write_utf("queue://orders").unwrap();
        let bytes = out.freeze();
        let mut input = DataInput::new(&bytes);
        assert_eq!(input.read_utf().unwrap(), "queue://orders");
        assert!(!input.has_remaining());

        let huge = "x".repeat(u16::MAX as usize + 1);
        assert!(matches!(
            DataOutput::new().write_utf(&huge),
            Err(ProtocolError::StringTooLong(_))
        ));
    }

    #[test]
    fn test_negative_length_rejected() {
        let mut input = DataInput::new(&[0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(matches!(
            input.read_sized_bytes(),
            Err(ProtocolError::InvalidData(_))
        ));
    }
}
