//! Bounded byte region for bytes read but not yet consumed into a frame.

use crate::error::FrameFault;
use crate::protocol::START_BYTE;
use bytes::{Buf, BytesMut};
use std::ops::Deref;

pub const BUFFER_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct FrameBuffer {
    bytes: BytesMut,
    capacity: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::with_capacity(BUFFER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Free space left before the buffer is full.
    pub fn room(&self) -> usize {
        self.capacity - self.bytes.len()
    }

    /// Append freshly read bytes. Anything that would not fit is rejected whole.
    pub fn append(&mut self, data: &[u8]) -> Result<(), FrameFault> {
        if data.len() > self.room() {
            return Err(FrameFault::ReplyOverflow { max: self.capacity });
        }
        self.bytes.extend_from_slice(data);
        Ok(())
    }

    /// Drop `n` bytes from the front; remaining bytes move to offset zero.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.bytes.len());
        self.bytes.advance(n);
        // Reclaims the advanced prefix so the region never grows past capacity.
        self.bytes.reserve(self.capacity - self.bytes.len());
    }

    /// Discard everything in front of the first start byte.
    ///
    /// Returns the number of discarded bytes, or an error (after clearing the
    /// buffer) when no start byte is buffered at all.
    pub fn resync(&mut self) -> Result<usize, FrameFault> {
        match self.bytes.iter().position(|b| *b == START_BYTE) {
            Some(offset) => {
                self.consume(offset);
                Ok(offset)
            }
            None => {
                let buffered = self.bytes.len();
                self.bytes.clear();
                Err(FrameFault::MissingStartByte { buffered })
            }
        }
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for FrameBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_respects_capacity() {
        let mut buf = FrameBuffer::with_capacity(8);
        buf.append(&[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(buf.room(), 3);
        assert_eq!(buf.append(&[0; 4]), Err(FrameFault::ReplyOverflow { max: 8 }));
        assert_eq!(buf.len(), 5);
        buf.append(&[6, 7, 8]).unwrap();
        assert_eq!(buf.room(), 0);
    }

    #[test]
    fn test_consume_shifts_tail_to_front() {
        let mut buf = FrameBuffer::with_capacity(8);
        buf.append(&[1, 2, 3, 4, 5, 6]).unwrap();
        buf.consume(4);
        assert_eq!(&buf[..], &[5, 6]);
        assert_eq!(buf.room(), 6);
        buf.append(&[7, 8, 9, 10, 11, 12]).unwrap();
        assert_eq!(&buf[..], &[5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn test_resync_discards_garbage() {
        let mut buf = FrameBuffer::new();
        buf.append(&[0x00, 0x13, 0xAB, 0x01]).unwrap();
        assert_eq!(buf.resync(), Ok(2));
        assert_eq!(&buf[..], &[0xAB, 0x01]);
        assert_eq!(buf.resync(), Ok(0));
    }

    #[test]
    fn test_resync_without_start_byte_clears() {
        let mut buf = FrameBuffer::new();
        buf.append(&[0x01, 0x02, 0x03]).unwrap();
        assert_eq!(buf.resync(), Err(FrameFault::MissingStartByte { buffered: 3 }));
        assert!(buf.is_empty());
    }
}
