// src/transaction.rs

use crate::error::Error;
use crate::protocol;
use crate::reassembly::ReplyAssembler;
use crate::transport::Transport;
use bytes::Bytes;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

pub const MAX_ATTEMPTS: usize = 5;
/// Processing time the UPS needs after a write command before it answers.
pub const WRITE_SETTLE: Duration = Duration::from_secs(1);

/// One logical request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Single opcode, frame length 1.
    Read { opcode: u8 },
    /// Opcode plus parameters.
    Write { opcode: u8, payload: Bytes },
}

impl Command {
    pub fn read(opcode: u8) -> Self {
        Command::Read { opcode }
    }

    pub fn write(opcode: u8, payload: impl Into<Bytes>) -> Self {
        Command::Write {
            opcode,
            payload: payload.into(),
        }
    }

    pub fn opcode(&self) -> u8 {
        match self {
            Command::Read { opcode } | Command::Write { opcode, .. } => *opcode,
        }
    }

    pub fn encode(&self) -> Result<Bytes, Error> {
        match self {
            Command::Read { opcode } => Ok(protocol::encode_read(*opcode)),
            Command::Write { opcode, payload } => protocol::encode_write(*opcode, payload),
        }
    }
}

/// Outcome of one transaction.
#[derive(Debug)]
pub struct Exchange {
    pub reply: Result<Bytes, Error>,
    /// One entry per attempt rejected for a sequence or checksum fault.
    pub protocol_faults: Vec<String>,
}

/// Pairs a command with its reassembled reply, retrying a bounded number of times.
#[derive(Debug, Clone)]
pub struct TransactionManager {
    assembler: ReplyAssembler,
    max_attempts: usize,
    write_settle: Duration,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new(ReplyAssembler::default(), MAX_ATTEMPTS, WRITE_SETTLE)
    }
}

impl TransactionManager {
    pub fn new(assembler: ReplyAssembler, max_attempts: usize, write_settle: Duration) -> Self {
        Self {
            assembler,
            max_attempts,
            write_settle,
        }
    }

    /// Run `command` until a non-empty reply arrives or the attempts run out.
    pub async fn execute<T: Transport>(&self, transport: &mut T, command: &Command) -> Result<Bytes, Error> {
        self.exchange(transport, command).await.reply
    }

    /// Like [`execute`](Self::execute), also returning the protocol faults seen on the way.
    pub async fn exchange<T: Transport>(&self, transport: &mut T, command: &Command) -> Exchange {
        let mut protocol_faults = Vec::new();
        let reply = self.run(transport, command, &mut protocol_faults).await;
        Exchange { reply, protocol_faults }
    }

    async fn run<T: Transport>(
        &self,
        transport: &mut T,
        command: &Command,
        protocol_faults: &mut Vec<String>,
    ) -> Result<Bytes, Error> {
        let frame = command.encode()?;
        let opcode = command.opcode();
        let mut last = Error::EmptyReply;
        let mut attempts = 0;

        for attempt in 1..=self.max_attempts {
            attempts = attempt;
            match self.attempt(transport, command, &frame).await {
                Ok(reply) if !reply.is_empty() => {
                    if attempt > 1 {
                        info!("Command {:#04x} succeeded on attempt {}", opcode, attempt);
                    }
                    return Ok(reply);
                }
                Ok(_) => {
                    debug!("Empty reply to {:#04x} (attempt {})", opcode, attempt);
                    last = Error::EmptyReply;
                }
                Err(e) => {
                    debug!("Attempt {} for {:#04x} failed: {}", attempt, opcode, e);
                    if e.is_protocol_fault() {
                        protocol_faults.push(format!("Reply to {opcode:#04x}: {e}"));
                    }
                    let fatal = e.is_disconnect();
                    last = e;
                    if fatal {
                        break;
                    }
                }
            }
        }

        warn!("Command {:#04x} failed after {} attempts: {}", opcode, attempts, last);
        Err(Error::RetryExhausted {
            opcode,
            attempts,
            last: Box::new(last),
        })
    }

    async fn attempt<T: Transport>(&self, transport: &mut T, command: &Command, frame: &[u8]) -> Result<Bytes, Error> {
        // Some units stall the descriptor request yet still act on it, so only a
        // vanished device ends the attempt here.
        if let Err(e) = transport.send_frame(frame).await {
            if e.is_disconnect() {
                return Err(e);
            }
            debug!("Sending {:#04x} reported: {}", command.opcode(), e);
        }
        if let Command::Write { .. } = command {
            sleep(self.write_settle).await;
        }
        self.assembler.receive(transport, command.opcode()).await
    }
}
