use crate::device::base::TransferStatus;

#[derive(thiserror::Error, Debug)]
pub enum ConnectError {
    #[error("No Hantek 6022 found at index {index} ({found} attached)")]
    DeviceNotFound { index: usize, found: usize },

    #[error("USB error: {0}")]
    UsbError(#[from] rusb::Error),

    #[error("Unable to Claim Interface: {0}")]
    DeviceNotClaimed(rusb::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error("Invalid channel count {0}, expected 1 or 2")]
    InvalidChannelCount(u8),

    #[error("Invalid sample rate code {0:#04x}")]
    InvalidSampleRate(u8),

    #[error("Invalid voltage range code {0:#04x}")]
    InvalidVoltageRange(u8),

    #[error("Invalid channel {0}, expected 1 or 2")]
    InvalidChannel(u8),

    #[error("USB error: {0}")]
    UsbError(#[from] rusb::Error),

    #[error("USB error after {transferred} bytes: {error}")]
    PartialTransfer {
        transferred: usize,
        error: rusb::Error,
    },

    #[error("Control write accepted {written} of {expected} bytes")]
    ShortWrite { expected: usize, written: usize },
}

impl CommandError {
    /// True for errors raised before anything was sent to the device.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            CommandError::InvalidChannelCount(_)
                | CommandError::InvalidSampleRate(_)
                | CommandError::InvalidVoltageRange(_)
                | CommandError::InvalidChannel(_)
        )
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AcquisitionError {
    #[error("Buffer size must be greater than zero")]
    InvalidBufferSize,

    #[error("At least one transfer must be kept in flight")]
    InvalidConcurrency,

    #[error("Unable to allocate transfers: {0}")]
    QueueAllocation(rusb::Error),

    #[error("Unable to submit transfer {slot}: {error}")]
    Submit { slot: usize, error: rusb::Error },

    #[error("USB event handling failed: {0}")]
    Fatal(rusb::Error),
}

// A single slot failing, reported through the event channel rather than returned.
#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq)]
#[error("Transfer on slot {slot} failed: {status}")]
pub struct TransferError {
    pub slot: usize,
    pub status: TransferStatus,
}
