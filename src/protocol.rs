//! # BCM/XCP Frame Format
//!
//! Constants, request catalogue and the pure frame codec for the XCP protocol
//! spoken by Powerware-family UPS units over USB.
//!
//! ## Wire Layout
//!
//! Host to device (command):
//!
//! ```text
//! [0xAB] [len] [opcode] [payload ...] [checksum]
//! ```
//!
//! where `len` counts the opcode plus the payload. Device to host (reply frame):
//!
//! ```text
//! [0xAB] [block] [length] [sequence] [payload; length] [checksum]
//! ```
//!
//! The low seven bits of `sequence` hold the 1-based ordinal of the frame inside
//! a multi-frame reply, the high bit marks the last frame. The checksum byte makes
//! the wrapping sum of the whole frame equal to zero.

use crate::error::{Error, FrameFault};
use bytes::{BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::{Display, EnumString};

// --- Constants ---

pub const START_BYTE: u8 = 0xAB;
/// Start, block number, length and sequence.
pub const HEADER_LEN: usize = 4;
/// Header plus the trailing checksum byte.
pub const HEADER_SIZE: usize = HEADER_LEN + 1;
pub const SEQ_MASK: u8 = 0x7F;
pub const LAST_SEQ: u8 = 0x80;
/// 121 in normal operation, 140 in test mode. The larger one is accepted.
pub const MAX_FRAME_PAYLOAD: u8 = 140;
pub const MAX_REPLY_LEN: usize = 256;
pub const SEND_BUFFER_LEN: usize = 128;
/// Opcode plus payload that still fits the send buffer with start, length and checksum.
pub const MAX_COMMAND_LEN: usize = SEND_BUFFER_LEN - 3;

pub const ENDPOINT_IN: u8 = 0x81;

/// Well-known read requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
#[repr(u8)]
pub enum Request {
    IdBlock = 0x31,
    EventHistory = 0x32,
    Status = 0x33,
    MeterBlock = 0x34,
    CurrentAlarms = 0x35,
    ConfigBlock = 0x36,
    Battery = 0x3B,
    LimitBlock = 0x3C,
    TestResult = 0x3F,
    CommandList = 0x40,
    OutletMonitor = 0x41,
    CommCapabilities = 0x42,
    Topology = 0x43,
}

/// Two's-complement checksum of `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_sub(*b))
}

/// `[0xAB, 0x01, opcode, checksum]`
pub fn encode_read(opcode: u8) -> Bytes {
    let mut frame = BytesMut::with_capacity(4);
    frame.put_slice(&[START_BYTE, 0x01, opcode]);
    let sum = checksum(&frame);
    frame.put_u8(sum);
    frame.freeze()
}

/// `[0xAB, len, opcode, payload..., checksum]` with `len = payload.len() + 1`.
pub fn encode_write(opcode: u8, payload: &[u8]) -> Result<Bytes, Error> {
    let len = payload.len() + 1;
    if len > MAX_COMMAND_LEN {
        return Err(Error::CommandTooLong {
            len,
            max: MAX_COMMAND_LEN,
        });
    }
    let mut frame = BytesMut::with_capacity(len + 3);
    frame.put_u8(START_BYTE);
    frame.put_u8(len as u8);
    frame.put_u8(opcode);
    frame.put_slice(payload);
    let sum = checksum(&frame);
    frame.put_u8(sum);
    Ok(frame.freeze())
}

/// The four header bytes of a reply frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub start_ok: bool,
    pub block_number: u8,
    pub length: u8,
    pub sequence: u8,
}

impl FrameHeader {
    /// Decode the header at the front of `buf`, `None` if fewer than four bytes are present.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let header: &[u8; HEADER_LEN] = buf.get(..HEADER_LEN)?.try_into().ok()?;
        Some(Self {
            start_ok: header[0] == START_BYTE,
            block_number: header[1],
            length: header[2],
            sequence: header[3],
        })
    }

    pub fn ordinal(&self) -> u8 {
        self.sequence & SEQ_MASK
    }

    pub fn is_last(&self) -> bool {
        self.sequence & LAST_SEQ != 0
    }

    /// Header, payload and checksum.
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.length as usize
    }

    pub fn check_length(&self) -> Result<(), FrameFault> {
        if self.length > MAX_FRAME_PAYLOAD {
            return Err(FrameFault::LengthOutOfRange(self.length));
        }
        Ok(())
    }
}

/// `(start_ok, block_number, length)` of the header at the front of `buf`.
pub fn decode_header(buf: &[u8]) -> Option<(bool, u8, u8)> {
    FrameHeader::decode(buf).map(|h| (h.start_ok, h.block_number, h.length))
}

/// Verify the checksum of the complete reply frame at the front of `frame`.
pub fn validate(frame: &[u8]) -> Result<(), FrameFault> {
    let header = FrameHeader::decode(frame).ok_or(FrameFault::MissingStartByte {
        buffered: frame.len(),
    })?;
    let body = frame
        .get(..header.frame_len())
        .ok_or(FrameFault::Truncated {
            needed: header.frame_len(),
            buffered: frame.len(),
        })?;
    let sum = body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if sum != 0 {
        return Err(FrameFault::ChecksumMismatch { sum });
    }
    Ok(())
}

/// Build a device reply frame, as the UPS would send it.
///
/// Payloads longer than [`MAX_FRAME_PAYLOAD`] are rejected with
/// [`FrameFault::LengthOutOfRange`].
pub fn encode_reply(block_number: u8, ordinal: u8, last: bool, payload: &[u8]) -> Result<Bytes, FrameFault> {
    let length = u8::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_PAYLOAD)
        .ok_or(FrameFault::LengthOutOfRange(payload.len().min(u8::MAX as usize) as u8))?;
    let mut frame = BytesMut::with_capacity(payload.len() + HEADER_SIZE);
    let sequence = (ordinal & SEQ_MASK) | if last { LAST_SEQ } else { 0 };
    frame.put_slice(&[START_BYTE, block_number, length, sequence]);
    frame.put_slice(payload);
    let sum = checksum(&frame);
    frame.put_u8(sum);
    Ok(frame.freeze())
}
