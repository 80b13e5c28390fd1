// src/usb.rs

use crate::error::Error;
use crate::protocol::ENDPOINT_IN;
use crate::selector::DeviceSelector;
use crate::transport::{DescriptorVariant, DeviceIdentity, Opener, Transport};
use bytes::Bytes;
use nusb::transfer::{ControlOut, ControlType, Recipient, RequestBuffer};
use nusb::{Device, DeviceInfo, Interface};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

const CONTROL_TIMEOUT: Duration = Duration::from_millis(1000);
const SET_DESCRIPTOR: u8 = 0x07;
const DT_STRING: u16 = 0x03;
const DESCRIPTOR_INDEX: u16 = 4;
const PHOENIXTEC_REQUEST: u8 = 0x0d;

fn identity_of(info: &DeviceInfo) -> DeviceIdentity {
    DeviceIdentity {
        vendor_id: info.vendor_id(),
        product_id: info.product_id(),
        vendor: info.manufacturer_string().map(str::to_owned),
        product: info.product_string().map(str::to_owned),
        serial: info.serial_number().map(str::to_owned),
        bus: info.bus_number(),
    }
}

/// Finds and opens supported UPS units through `nusb`.
pub struct UsbOpener {
    selector: DeviceSelector,
    interface_number: u8,
    pinned: Option<DeviceIdentity>,
}

impl UsbOpener {
    pub fn new(selector: DeviceSelector) -> Self {
        Self {
            selector,
            interface_number: 0,
            pinned: None,
        }
    }

    fn find(&self) -> Result<(DeviceInfo, DeviceIdentity, DescriptorVariant), Error> {
        nusb::list_devices()?
            .find_map(|info| {
                let identity = identity_of(&info);
                let variant = DescriptorVariant::for_device(identity.vendor_id, identity.product_id)?;
                if !self.selector.matches(&identity) {
                    return None;
                }
                if let Some(pinned) = &self.pinned {
                    if !pinned.same_unit(&identity) {
                        return None;
                    }
                }
                Some((info, identity, variant))
            })
            .ok_or(Error::DeviceNotFound)
    }
}

impl Opener for UsbOpener {
    type Session = UsbSession;

    async fn open(&mut self) -> Result<UsbSession, Error> {
        let (info, identity, variant) = self.find()?;
        info!(
            "Found {} (bus {} addr {}), using {:?}",
            identity,
            info.bus_number(),
            info.device_address(),
            variant
        );
        let device = info.open()?;
        let interface = device.detach_and_claim_interface(self.interface_number)?;
        debug!("Interface {} claimed", self.interface_number);
        Ok(UsbSession {
            device,
            interface,
            variant,
            identity,
        })
    }

    fn pin(&mut self, identity: &DeviceIdentity) {
        self.pinned = Some(identity.clone());
    }
}

/// An open, claimed UPS.
pub struct UsbSession {
    device: Device,
    interface: Interface,
    variant: DescriptorVariant,
    identity: DeviceIdentity,
}

impl UsbSession {
    fn control_request<'a>(&self, data: &'a [u8]) -> ControlOut<'a> {
        match self.variant {
            DescriptorVariant::PowerwareStyle => ControlOut {
                control_type: ControlType::Standard,
                recipient: Recipient::Device,
                request: SET_DESCRIPTOR,
                value: (DT_STRING << 8) | DESCRIPTOR_INDEX,
                index: 0,
                data,
            },
            DescriptorVariant::PhoenixtecStyle => ControlOut {
                control_type: ControlType::Vendor,
                recipient: Recipient::Endpoint,
                request: PHOENIXTEC_REQUEST,
                value: 0,
                index: 0,
                data,
            },
        }
    }
}

impl Transport for UsbSession {
    async fn send_frame(&mut self, frame: &[u8]) -> Result<(), Error> {
        debug!(bytes = hex::encode(frame), "USB Write");
        let transfer = self.interface.control_out(self.control_request(frame));
        let completion = timeout(CONTROL_TIMEOUT, transfer)
            .await
            .map_err(|_| Error::Timeout(CONTROL_TIMEOUT))?;
        completion.into_result()?;
        Ok(())
    }

    async fn receive(&mut self, max_len: usize, limit: Duration) -> Result<Bytes, Error> {
        let transfer = self.interface.interrupt_in(ENDPOINT_IN, RequestBuffer::new(max_len));
        let completion = timeout(limit, transfer).await.map_err(|_| Error::Timeout(limit))?;
        let data = completion.into_result()?;
        debug!(bytes = hex::encode(&data), "USB Read");
        Ok(Bytes::from(data))
    }

    fn clear_halt(&mut self) -> Result<(), Error> {
        self.interface.clear_halt(ENDPOINT_IN)?;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), Error> {
        info!("Performing USB device reset...");
        self.device.reset()?;
        Ok(())
    }

    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn close(self) {
        debug!("Releasing {}", self.identity);
        drop(self.interface);
        drop(self.device);
    }
}
