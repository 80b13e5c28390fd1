//! Scripted in-memory UPS shared by the integration tests

// Not every test file uses every helper
#![allow(dead_code)]

use bcmxcp_usb::error::Error;
use bcmxcp_usb::protocol::encode_reply;
use bcmxcp_usb::transport::{DeviceIdentity, Opener, Transport};
use bytes::Bytes;
use nusb::transfer::TransferError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// What the next interrupt read returns.
#[derive(Debug, Clone)]
pub enum Read {
    Data(Vec<u8>),
    /// Zero-length completion.
    Empty,
    Fault(TransferError),
    /// Nothing arrives before the read's timeout.
    Silence,
}

#[derive(Debug, Default)]
pub struct DeviceState {
    pub reads: VecDeque<Read>,
    pub sent: Vec<Vec<u8>>,
    pub opens: usize,
    pub open_failures_left: usize,
    pub clear_halt_calls: usize,
    pub halt_failures_left: usize,
    pub resets: usize,
    pub closes: usize,
}

/// Handle to the simulated unit, shared between the test and the sessions it hands out.
#[derive(Debug, Clone, Default)]
pub struct MockDevice(Arc<Mutex<DeviceState>>);

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.0.lock().expect("mock device poisoned")
    }

    pub fn push(&self, read: Read) {
        self.state().reads.push_back(read);
    }

    pub fn push_data(&self, bytes: impl Into<Vec<u8>>) {
        self.push(Read::Data(bytes.into()));
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state().sent.clone()
    }
}

pub fn powerware() -> DeviceIdentity {
    DeviceIdentity {
        vendor_id: 0x0592,
        product_id: 0x0002,
        vendor: Some("POWERWARE".into()),
        product: Some("Powerware 9125".into()),
        serial: Some("EE111A0000".into()),
        bus: 1,
    }
}

pub struct MockTransport {
    device: MockDevice,
    identity: DeviceIdentity,
}

impl MockTransport {
    pub fn new(device: MockDevice) -> Self {
        Self {
            device,
            identity: powerware(),
        }
    }
}

impl Transport for MockTransport {
    async fn send_frame(&mut self, frame: &[u8]) -> Result<(), Error> {
        self.device.state().sent.push(frame.to_vec());
        Ok(())
    }

    async fn receive(&mut self, max_len: usize, timeout: Duration) -> Result<Bytes, Error> {
        let next = self.device.state().reads.pop_front();
        match next {
            Some(Read::Data(mut data)) => {
                if data.len() > max_len {
                    let rest = data.split_off(max_len);
                    self.device.state().reads.push_front(Read::Data(rest));
                }
                Ok(Bytes::from(data))
            }
            Some(Read::Empty) => Ok(Bytes::new()),
            Some(Read::Fault(e)) => Err(Error::TransportFault(e)),
            Some(Read::Silence) | None => {
                tokio::time::sleep(timeout).await;
                Err(Error::Timeout(timeout))
            }
        }
    }

    fn clear_halt(&mut self) -> Result<(), Error> {
        let mut state = self.device.state();
        state.clear_halt_calls += 1;
        if state.halt_failures_left > 0 {
            state.halt_failures_left -= 1;
            return Err(Error::TransportFault(TransferError::Stall));
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), Error> {
        self.device.state().resets += 1;
        Ok(())
    }

    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn close(self) {
        self.device.state().closes += 1;
    }
}

pub struct MockOpener {
    device: MockDevice,
    pinned: Option<DeviceIdentity>,
}

impl MockOpener {
    pub fn new(device: MockDevice) -> Self {
        Self { device, pinned: None }
    }

    pub fn pinned(&self) -> Option<&DeviceIdentity> {
        self.pinned.as_ref()
    }
}

impl Opener for MockOpener {
    type Session = MockTransport;

    async fn open(&mut self) -> Result<MockTransport, Error> {
        {
            let mut state = self.device.state();
            state.opens += 1;
            if state.open_failures_left > 0 {
                state.open_failures_left -= 1;
                return Err(Error::DeviceNotFound);
            }
        }
        Ok(MockTransport::new(self.device.clone()))
    }

    fn pin(&mut self, identity: &DeviceIdentity) {
        self.pinned = Some(identity.clone());
    }
}

/// A reply frame as the UPS sends it.
pub fn frame(ordinal: u8, last: bool, payload: &[u8]) -> Vec<u8> {
    encode_reply(0x01, ordinal, last, payload).unwrap().to_vec()
}

/// Same frame with a broken checksum byte.
pub fn corrupt_frame(ordinal: u8, last: bool, payload: &[u8]) -> Vec<u8> {
    let mut bytes = frame(ordinal, last, payload);
    if let Some(sum) = bytes.last_mut() {
        *sum = sum.wrapping_add(1);
    }
    bytes
}
