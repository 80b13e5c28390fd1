//! Reassembly of a (possibly multi-frame) XCP reply.
//!
//! The engine issues bounded reads against one shared wall-clock budget, resyncs
//! on the start byte when garbage shows up, and concatenates the payloads of
//! frames `1..=N` where frame `N` carries the last-frame flag. Any sequence or
//! checksum failure aborts the whole reply.

use crate::buffer::FrameBuffer;
use crate::error::{Error, FrameFault};
use crate::protocol::{self, FrameHeader, HEADER_LEN, HEADER_SIZE, MAX_REPLY_LEN, START_BYTE};
use crate::transport::Transport;
use bytes::{Bytes, BytesMut};
use std::time::Duration;
use tokio::time::{Instant, timeout};
use tracing::{debug, trace, warn};

pub const REPLY_TIMEOUT: Duration = Duration::from_millis(5000);
/// Size of a single interrupt read request.
pub const READ_SIZE: usize = 128;

#[derive(Debug, Clone)]
pub struct ReplyAssembler {
    timeout: Duration,
}

impl Default for ReplyAssembler {
    fn default() -> Self {
        Self::new(REPLY_TIMEOUT)
    }
}

impl ReplyAssembler {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Read the reply to `opcode` and return the concatenated payload.
    pub async fn receive<T: Transport>(&self, transport: &mut T, opcode: u8) -> Result<Bytes, Error> {
        let deadline = Instant::now() + self.timeout;
        let mut buffer = FrameBuffer::new();
        let mut reply = BytesMut::with_capacity(MAX_REPLY_LEN);
        let mut expected: u8 = 1;
        let mut need = HEADER_SIZE;

        debug!("Waiting for reply to {:#04x}", opcode);

        loop {
            if buffer.len() < need {
                self.fill(transport, &mut buffer, deadline).await?;
                continue;
            }

            if buffer[0] != START_BYTE {
                // Bad cables and bad ports both end up here.
                debug!("wrong header {:#04x}, looking for {:#04x}", buffer[0], START_BYTE);
                let dropped = buffer.resync()?;
                trace!(dropped, "resynchronised on start byte");
                need = HEADER_SIZE;
                continue;
            }

            let header = FrameHeader::decode(&buffer).ok_or(FrameFault::Truncated {
                needed: HEADER_LEN,
                buffered: buffer.len(),
            })?;
            trace!(block = header.block_number, length = header.length, "frame header");
            header.check_length()?;

            if buffer.len() < header.frame_len() {
                need = header.frame_len();
                trace!("need {} more bytes", need - buffer.len());
                continue;
            }

            if header.ordinal() != expected {
                warn!(
                    "Not the right sequence received for {:#04x}: {} instead of {}",
                    opcode,
                    header.ordinal(),
                    expected
                );
                return Err(Error::SequenceDesync {
                    expected,
                    received: header.ordinal(),
                });
            }

            protocol::validate(&buffer).inspect_err(|fault| warn!("Reply to {:#04x} rejected: {}", opcode, fault))?;

            let payload = &buffer[HEADER_LEN..HEADER_LEN + header.length as usize];
            if reply.len() + payload.len() > MAX_REPLY_LEN {
                return Err(FrameFault::ReplyOverflow { max: MAX_REPLY_LEN }.into());
            }
            reply.extend_from_slice(payload);
            buffer.consume(header.frame_len());

            if header.is_last() {
                debug!(bytes = hex::encode(&reply), "reply to {:#04x} complete", opcode);
                return Ok(reply.freeze());
            }

            expected = expected.wrapping_add(1);
            need = HEADER_SIZE;
            trace!("next sequence is {}", expected);
        }
    }

    /// One bounded read with whatever is left of the budget.
    async fn fill<T: Transport>(&self, transport: &mut T, buffer: &mut FrameBuffer, deadline: Instant) -> Result<(), Error> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::Timeout(self.timeout));
        }
        let max_len = READ_SIZE.min(buffer.room());
        if max_len == 0 {
            return Err(FrameFault::ReplyOverflow { max: buffer.len() }.into());
        }

        match timeout(remaining, transport.receive(max_len, remaining)).await {
            Err(_) | Ok(Err(Error::Timeout(_))) => Err(Error::Timeout(self.timeout)),
            Ok(Err(e)) => {
                if let Err(clear) = transport.clear_halt() {
                    debug!("clearing IN endpoint halt failed: {}", clear);
                }
                Err(e)
            }
            // Seen on XSlot USB cards: not end of stream, just read again.
            Ok(Ok(data)) if data.is_empty() => {
                trace!("zero-length read");
                Ok(())
            }
            Ok(Ok(data)) => {
                buffer.append(&data)?;
                trace!(bytes = hex::encode(&buffer[..]), "buffered");
                Ok(())
            }
        }
    }
}
