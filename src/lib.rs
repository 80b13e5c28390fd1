pub mod buffer;
pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod health;
pub mod protocol;
pub mod reassembly;
pub mod selector;
pub mod state;
pub mod transaction;
pub mod transport;
pub mod usb;

pub use config::DriverConfig;
pub use driver::XcpDriver;
pub use error::{Error, FrameFault};
pub use health::{FailureReport, ShutdownToken};
pub use protocol::Request;
pub use selector::{DeviceSelector, SelectorConfig};
pub use state::{MemoryStore, StateStore};
pub use transport::{DescriptorVariant, DeviceIdentity, Opener, Transport};
pub use usb::UsbOpener;
