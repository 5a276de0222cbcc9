// These traits are the seam between the scope logic (Session / Acquisition) and whatever is
// actually moving bytes. The libusb implementation lives in `device::libusb`, tests swap in a
// mock so the protocol and the slot bookkeeping can be checked without hardware.
use crate::error::CommandError;
use std::fmt::{Display, Formatter};

pub trait ScopeTransport: Send + Sync {
    type Queue: TransferQueue;

    /// Sends a vendor OUT control request, returning the number of bytes accepted.
    fn write_control(&self, request: u8, data: &[u8]) -> Result<usize, rusb::Error>;

    /// A single blocking bulk IN transfer into `buffer`.
    fn read_bulk(&self, buffer: &mut [u8]) -> Result<usize, CommandError>;

    /// Allocates a queue able to keep `slots` bulk IN transfers in flight.
    fn transfer_queue(&self, slots: usize) -> Result<Self::Queue, rusb::Error>;

    /// Releases the claimed interface. Called once, when the session is closed.
    fn release(&mut self) -> Result<(), rusb::Error>;
}

// A slot's buffer is moved into the queue on submit and handed back inside its Completion, so
// nothing outside the queue can see a buffer the device may still be writing to.
pub trait TransferQueue: Send + Sync {
    fn submit(&self, slot: usize, buffer: Vec<u8>) -> Result<(), rusb::Error>;

    /// Requests cancellation. A cancelled slot still delivers exactly one Completion.
    /// Returns `NotFound` if the slot isn't in flight.
    fn cancel(&self, slot: usize) -> Result<(), rusb::Error>;

    /// Blocks until at least one transfer has completed, or until `wake` is called (in which
    /// case the result may be empty).
    fn wait(&self) -> Result<Vec<Completion>, rusb::Error>;

    /// Unblocks a `wait` in progress on another thread. Safe to call from any thread.
    fn wake(&self);
}

#[derive(Debug)]
pub struct Completion {
    pub slot: usize,
    pub status: TransferStatus,
    pub length: usize,
    pub buffer: Vec<u8>,
}

impl Completion {
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.length.min(self.buffer.len())]
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TransferStatus {
    Completed,
    Error,
    TimedOut,
    Cancelled,
    Stall,
    NoDevice,
    Overflow,
    Unknown(i32),
}

impl Display for TransferStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferStatus::Completed => write!(f, "completed"),
            TransferStatus::Error => write!(f, "error"),
            TransferStatus::TimedOut => write!(f, "timed out"),
            TransferStatus::Cancelled => write!(f, "cancelled"),
            TransferStatus::Stall => write!(f, "stall"),
            TransferStatus::NoDevice => write!(f, "no device"),
            TransferStatus::Overflow => write!(f, "overflow"),
            TransferStatus::Unknown(status) => write!(f, "unknown status {}", status),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ScopeDevice {
    pub index: usize,
    pub bus_number: u8,
    pub address: u8,
}
