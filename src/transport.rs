//! Seams between the protocol engine and the USB stack.
//!
//! The engine only ever talks to a [`Transport`]; sessions come from an
//! [`Opener`]. The production pair lives in [`crate::usb`], tests script their own.

use crate::error::Error;
use bytes::Bytes;
use std::fmt;
use std::future::Future;
use std::time::Duration;

// Vendor ids of supported units
pub const POWERWARE: u16 = 0x0592;
pub const PHOENIXTEC: u16 = 0x06da;
pub const HP_VENDORID: u16 = 0x03f0;

/// How a command frame is pushed to the device. Decided once per matched device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorVariant {
    /// Standard `SET_DESCRIPTOR` request addressed to the device.
    PowerwareStyle,
    /// Vendor request `0x0d` addressed to an endpoint.
    PhoenixtecStyle,
}

const QUIRKS: &[(u16, u16, DescriptorVariant)] = &[
    // various models
    (POWERWARE, 0x0002, DescriptorVariant::PowerwareStyle),
    // various models
    (PHOENIXTEC, 0x0002, DescriptorVariant::PhoenixtecStyle),
    // T500
    (HP_VENDORID, 0x1f01, DescriptorVariant::PhoenixtecStyle),
    // T750
    (HP_VENDORID, 0x1f02, DescriptorVariant::PhoenixtecStyle),
];

impl DescriptorVariant {
    /// Look up the send variant for a vendor/product pair, `None` for unsupported devices.
    pub fn for_device(vendor_id: u16, product_id: u16) -> Option<Self> {
        QUIRKS
            .iter()
            .find(|(vid, pid, _)| *vid == vendor_id && *pid == product_id)
            .map(|(_, _, variant)| *variant)
    }
}

/// Identity captured when a session is opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub vendor: Option<String>,
    pub product: Option<String>,
    pub serial: Option<String>,
    pub bus: u8,
}

impl DeviceIdentity {
    /// Same physical unit for reconnect purposes. The bus may change across a replug.
    pub fn same_unit(&self, other: &DeviceIdentity) -> bool {
        self.vendor_id == other.vendor_id
            && self.product_id == other.product_id
            && self.vendor == other.vendor
            && self.product == other.product
            && self.serial == other.serial
    }

    pub fn vendor_id_hex(&self) -> String {
        format!("{:04x}", self.vendor_id)
    }

    pub fn product_id_hex(&self) -> String {
        format!("{:04x}", self.product_id)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)?;
        if let Some(product) = &self.product {
            write!(f, " \"{product}\"")?;
        }
        if let Some(serial) = &self.serial {
            write!(f, " serial {serial}")?;
        }
        write!(f, " on bus {:03}", self.bus)
    }
}

/// One open session to a UPS.
pub trait Transport {
    /// Push one complete command frame to the device.
    fn send_frame(&mut self, frame: &[u8]) -> impl Future<Output = Result<(), Error>>;

    /// One bounded read from the interrupt IN endpoint. An empty result is legal.
    fn receive(&mut self, max_len: usize, timeout: Duration) -> impl Future<Output = Result<Bytes, Error>>;

    /// Clear a halt condition on the IN endpoint.
    fn clear_halt(&mut self) -> Result<(), Error>;

    fn reset(&mut self) -> Result<(), Error>;

    fn identity(&self) -> &DeviceIdentity;

    /// Release the session.
    fn close(self)
    where
        Self: Sized,
    {
    }
}

/// Produces sessions to a matching device.
pub trait Opener {
    type Session: Transport;

    fn open(&mut self) -> impl Future<Output = Result<Self::Session, Error>>;

    /// Restrict later opens to the unit identified by `identity`.
    fn pin(&mut self, _identity: &DeviceIdentity) {}
}
