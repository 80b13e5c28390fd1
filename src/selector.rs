//! User-supplied device filters.

use crate::error::Error;
use crate::transport::DeviceIdentity;
use regex::{Regex, RegexBuilder};

/// Raw patterns as given on the command line. `None` matches anything.
#[derive(Debug, Clone, Default)]
pub struct SelectorConfig {
    pub vendor_id: Option<String>,
    pub product_id: Option<String>,
    pub vendor: Option<String>,
    pub product: Option<String>,
    pub serial: Option<String>,
    pub bus: Option<String>,
}

/// Compiled, anchored and case-insensitive form of a [`SelectorConfig`].
#[derive(Debug, Clone, Default)]
pub struct DeviceSelector {
    vendor_id: Option<Regex>,
    product_id: Option<Regex>,
    vendor: Option<Regex>,
    product: Option<Regex>,
    serial: Option<Regex>,
    bus: Option<Regex>,
}

fn compile(pattern: &Option<String>) -> Result<Option<Regex>, Error> {
    pattern
        .as_deref()
        .map(|p| RegexBuilder::new(&format!("^(?:{p})$")).case_insensitive(true).build())
        .transpose()
        .map_err(Error::from)
}

/// An absent device string only satisfies an absent pattern.
fn field_matches(pattern: &Option<Regex>, value: Option<&str>) -> bool {
    match (pattern, value) {
        (None, _) => true,
        (Some(re), Some(v)) => re.is_match(v),
        (Some(_), None) => false,
    }
}

impl DeviceSelector {
    pub fn new(config: &SelectorConfig) -> Result<Self, Error> {
        Ok(Self {
            vendor_id: compile(&config.vendor_id)?,
            product_id: compile(&config.product_id)?,
            vendor: compile(&config.vendor)?,
            product: compile(&config.product)?,
            serial: compile(&config.serial)?,
            bus: compile(&config.bus)?,
        })
    }

    pub fn matches(&self, device: &DeviceIdentity) -> bool {
        field_matches(&self.vendor_id, Some(&device.vendor_id_hex()))
            && field_matches(&self.product_id, Some(&device.product_id_hex()))
            && field_matches(&self.vendor, device.vendor.as_deref())
            && field_matches(&self.product, device.product.as_deref())
            && field_matches(&self.serial, device.serial.as_deref())
            && field_matches(&self.bus, Some(&format!("{:03}", device.bus)))
    }
}
