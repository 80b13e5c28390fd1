// src/error.rs

use nusb::transfer::TransferError;
use std::time::Duration;
use thiserror::Error;

/// The primary error type for the `bcmxcp-usb` library.
#[derive(Error, Debug)]
pub enum Error {
    #[error("No matching UPS found on the USB bus")]
    DeviceNotFound,

    #[error("Unable to find a USB POWERWARE device after {attempts} attempts")]
    TransportUnavailable { attempts: usize },

    #[error("USB error: {0}")]
    Usb(#[from] nusb::Error),

    #[error("USB transfer error: {0}")]
    TransportFault(#[from] TransferError),

    #[error("Corrupt XCP frame: {0}")]
    FrameCorrupt(#[from] FrameFault),

    #[error("Sequence desync: expected frame {expected}, got {received}")]
    SequenceDesync { expected: u8, received: u8 },

    #[error("No complete reply within {0:?}")]
    Timeout(Duration),

    #[error("Command {opcode:#04x} failed after {attempts} attempts")]
    RetryExhausted {
        opcode: u8,
        attempts: usize,
        #[source]
        last: Box<Error>,
    },

    #[error("Invalid device selector: {0}")]
    InvalidSelector(#[from] regex::Error),

    #[error("Reply carried no payload")]
    EmptyReply,

    #[error("No open USB session")]
    NotConnected,

    #[error("Command of {len} bytes exceeds the {max}-byte send buffer")]
    CommandTooLong { len: usize, max: usize },
}

/// Reasons a received frame is rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFault {
    #[error("no start byte in {buffered} buffered bytes")]
    MissingStartByte { buffered: usize },

    #[error("declared length {0} is out of range")]
    LengthOutOfRange(u8),

    #[error("checksum mismatch (frame sum {sum:#04x})")]
    ChecksumMismatch { sum: u8 },

    #[error("frame needs {needed} bytes, only {buffered} present")]
    Truncated { needed: usize, buffered: usize },

    #[error("reply exceeds {max} bytes")]
    ReplyOverflow { max: usize },
}

impl Error {
    /// True when the transport reported the device as gone.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::TransportFault(TransferError::Disconnected) => true,
            Error::RetryExhausted { last, .. } => last.is_disconnect(),
            _ => false,
        }
    }

    /// Sequence or checksum faults in a reply. Each one counts as a communication failure.
    pub fn is_protocol_fault(&self) -> bool {
        matches!(
            self,
            Error::SequenceDesync { .. } | Error::FrameCorrupt(FrameFault::ChecksumMismatch { .. })
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
