// This file wraps a libusb handle on a Hantek 6022 behind the ScopeTransport trait. Each
// transport owns its own libusb context rather than sharing the global one, so multiple scopes
// can be opened side by side and torn down independently.
use crate::device::base::{ScopeDevice, ScopeTransport};
use crate::device::libusb::queue::{error_from_libusb, LibusbQueue};
use crate::error::{CommandError, ConnectError};
use crate::{BULK_ENDPOINT, PID_HANTEK_6022, VID_HANTEK};
use log::{debug, info, warn};
use rusb::{
    ffi, Context, Device, DeviceHandle, Direction, Recipient, RequestType, UsbContext,
};
use std::ffi::c_int;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    pub interface: u8,
    pub control_timeout: Duration,

    /// Timeout for `read_sync`, zero waits forever.
    pub read_timeout: Duration,

    /// Timeout applied to every streamed transfer, zero waits forever.
    pub transfer_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            interface: 0,
            control_timeout: Duration::from_secs(1),
            read_timeout: Duration::ZERO,
            transfer_timeout: Duration::ZERO,
        }
    }
}

pub struct UsbTransport {
    handle: Arc<DeviceHandle<Context>>,
    options: TransportOptions,
    claimed: bool,
}

impl UsbTransport {
    pub fn open(index: usize, options: TransportOptions) -> Result<Self, ConnectError> {
        let context = Context::new()?;
        let devices = matching_devices(&context)?;

        let found = devices.len();
        let device = devices
            .into_iter()
            .nth(index)
            .ok_or(ConnectError::DeviceNotFound { index, found })?;

        let handle = device.open()?;
        info!("Connected to Hantek 6022 at {:?}", device);

        // Not every platform lets us detach the kernel driver, if it can't the claim below will
        // tell us whether it matters.
        if let Err(error) = handle.set_auto_detach_kernel_driver(true) {
            debug!("Kernel driver auto-detach unavailable: {}", error);
        }

        handle
            .claim_interface(options.interface)
            .map_err(ConnectError::DeviceNotClaimed)?;

        // Alternate setting 0 is the bulk interface.
        handle.set_alternate_setting(options.interface, 0)?;

        Ok(Self {
            handle: Arc::new(handle),
            options,
            claimed: true,
        })
    }
}

impl ScopeTransport for UsbTransport {
    type Queue = LibusbQueue;

    fn write_control(&self, request: u8, data: &[u8]) -> Result<usize, rusb::Error> {
        debug!("Control request {:#04x}: {:02x?}", request, data);
        self.handle.write_control(
            rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Device),
            request,
            0,
            0,
            data,
            self.options.control_timeout,
        )
    }

    fn read_bulk(&self, buffer: &mut [u8]) -> Result<usize, CommandError> {
        // rusb's read_bulk drops the byte count when a transfer fails part way, so go straight
        // to libusb here to keep it.
        let length = c_int::try_from(buffer.len()).map_err(|_| rusb::Error::InvalidParam)?;
        let mut transferred: c_int = 0;

        let result = unsafe {
            ffi::libusb_bulk_transfer(
                self.handle.as_raw(),
                BULK_ENDPOINT,
                buffer.as_mut_ptr(),
                length,
                &mut transferred,
                timeout_millis(self.options.read_timeout),
            )
        };

        let transferred = transferred.max(0) as usize;
        match result {
            0 => Ok(transferred),
            err => {
                let error = error_from_libusb(err);
                if transferred > 0 {
                    Err(CommandError::PartialTransfer { transferred, error })
                } else {
                    Err(CommandError::UsbError(error))
                }
            }
        }
    }

    fn transfer_queue(&self, slots: usize) -> Result<Self::Queue, rusb::Error> {
        LibusbQueue::new(
            self.handle.clone(),
            BULK_ENDPOINT,
            slots,
            self.options.transfer_timeout,
        )
    }

    fn release(&mut self) -> Result<(), rusb::Error> {
        if !self.claimed {
            return Ok(());
        }

        // Any queue holds a clone of the handle, so this only works once acquisition is gone.
        let interface = self.options.interface;
        let handle = Arc::get_mut(&mut self.handle).ok_or(rusb::Error::Busy)?;
        handle.release_interface(interface)?;
        self.claimed = false;

        debug!("Released interface {}", interface);
        Ok(())
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        if let Err(error) = self.release() {
            warn!("Unable to release scope interface: {}", error);
        }
    }
}

pub(crate) fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

fn matching_devices<T: UsbContext>(context: &T) -> Result<Vec<Device<T>>, rusb::Error> {
    let mut found_devices = Vec::new();
    for device in context.devices()?.iter() {
        if let Ok(descriptor) = device.device_descriptor() {
            if descriptor.vendor_id() == VID_HANTEK && descriptor.product_id() == PID_HANTEK_6022 {
                found_devices.push(device);
            }
        }
    }
    Ok(found_devices)
}

pub fn find_devices() -> Vec<ScopeDevice> {
    let context = match Context::new() {
        Ok(context) => context,
        Err(error) => {
            warn!("Unable to create USB context: {}", error);
            return Vec::new();
        }
    };

    match matching_devices(&context) {
        Ok(devices) => devices
            .iter()
            .enumerate()
            .map(|(index, device)| ScopeDevice {
                index,
                bus_number: device.bus_number(),
                address: device.address(),
            })
            .collect(),
        Err(error) => {
            warn!("Unable to list USB devices: {}", error);
            Vec::new()
        }
    }
}
