pub mod base;

// Linux, MacOS and Windows (via WinUSB) all go through libusb.
mod libusb;

pub use crate::device::libusb::device::{find_devices, TransportOptions, UsbTransport};
pub use crate::device::libusb::LibusbQueue;

#[cfg(test)]
pub(crate) mod mock;
