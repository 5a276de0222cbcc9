use crate::device::base::{Completion, TransferQueue, TransferStatus};
use crate::device::libusb::device::timeout_millis;
use log::{debug, warn};
use parking_lot::Mutex;
use rusb::ffi::{self, libusb_transfer};
use rusb::{Context, DeviceHandle, UsbContext};
use std::collections::VecDeque;
use std::ffi::{c_int, c_void};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

// rusb keeps its own status mapping private, so we carry a copy.
pub(crate) fn error_from_libusb(err: i32) -> rusb::Error {
    use rusb::ffi::constants::*;

    match err {
        LIBUSB_ERROR_IO => rusb::Error::Io,
        LIBUSB_ERROR_INVALID_PARAM => rusb::Error::InvalidParam,
        LIBUSB_ERROR_ACCESS => rusb::Error::Access,
        LIBUSB_ERROR_NO_DEVICE => rusb::Error::NoDevice,
        LIBUSB_ERROR_NOT_FOUND => rusb::Error::NotFound,
        LIBUSB_ERROR_BUSY => rusb::Error::Busy,
        LIBUSB_ERROR_TIMEOUT => rusb::Error::Timeout,
        LIBUSB_ERROR_OVERFLOW => rusb::Error::Overflow,
        LIBUSB_ERROR_PIPE => rusb::Error::Pipe,
        LIBUSB_ERROR_INTERRUPTED => rusb::Error::Interrupted,
        LIBUSB_ERROR_NO_MEM => rusb::Error::NoMem,
        LIBUSB_ERROR_NOT_SUPPORTED => rusb::Error::NotSupported,
        _ => rusb::Error::Other,
    }
}

fn status_from_libusb(status: c_int) -> TransferStatus {
    use rusb::ffi::constants::*;

    match status {
        LIBUSB_TRANSFER_COMPLETED => TransferStatus::Completed,
        LIBUSB_TRANSFER_ERROR => TransferStatus::Error,
        LIBUSB_TRANSFER_TIMED_OUT => TransferStatus::TimedOut,
        LIBUSB_TRANSFER_CANCELLED => TransferStatus::Cancelled,
        LIBUSB_TRANSFER_STALL => TransferStatus::Stall,
        LIBUSB_TRANSFER_NO_DEVICE => TransferStatus::NoDevice,
        LIBUSB_TRANSFER_OVERFLOW => TransferStatus::Overflow,
        other => TransferStatus::Unknown(other),
    }
}

/// Data touched by the libusb completion callback, boxed so its address stays put while
/// transfers point at it.
struct CallbackData {
    completed: Mutex<VecDeque<*mut libusb_transfer>>,

    /// Handed to `libusb_handle_events_completed`, which reads it without our lock held.
    flag: AtomicI32,
}

/// The libusb transfer completion callback. This runs inside `libusb_handle_events_completed`,
/// on whichever thread is currently in `wait`.
extern "system" fn transfer_callback(transfer: *mut libusb_transfer) {
    unsafe {
        let data = &*((*transfer).user_data as *const CallbackData);
        data.completed.lock().push_back(transfer);
        data.flag.store(1, Ordering::SeqCst);
    }
}

struct RawSlot {
    transfer: NonNull<libusb_transfer>,

    /// Present exactly while the transfer is in flight.
    buffer: Option<Vec<u8>>,
}

/// A fixed set of libusb bulk transfers, one per slot, allocated once and reused for every
/// submission on that slot.
pub struct LibusbQueue {
    handle: Arc<DeviceHandle<Context>>,
    endpoint: u8,
    timeout: u32,
    callback: Box<CallbackData>,
    slots: Mutex<Vec<RawSlot>>,
    woken: AtomicBool,
}

// Safety: the raw transfers are only touched with `slots` locked or from the callback, and the
// callback only runs inside `wait`. Transfers are freed in Drop after the last one has come back.
unsafe impl Send for LibusbQueue {}
unsafe impl Sync for LibusbQueue {}

impl LibusbQueue {
    pub(crate) fn new(
        handle: Arc<DeviceHandle<Context>>,
        endpoint: u8,
        slots: usize,
        timeout: Duration,
    ) -> Result<Self, rusb::Error> {
        let queue = Self {
            handle,
            endpoint,
            timeout: timeout_millis(timeout),
            callback: Box::new(CallbackData {
                completed: Mutex::new(VecDeque::new()),
                flag: AtomicI32::new(0),
            }),
            slots: Mutex::new(Vec::with_capacity(slots)),
            woken: AtomicBool::new(false),
        };

        {
            let mut raw_slots = queue.slots.lock();
            for _ in 0..slots {
                let transfer = unsafe { ffi::libusb_alloc_transfer(0) };
                let transfer = NonNull::new(transfer).ok_or(rusb::Error::NoMem)?;
                raw_slots.push(RawSlot {
                    transfer,
                    buffer: None,
                });
            }
        }

        debug!("Allocated {} bulk transfers on {:#04x}", slots, endpoint);
        Ok(queue)
    }

    fn context_raw(&self) -> *mut ffi::libusb_context {
        self.handle.context().as_raw()
    }

    fn collect(&self, transfers: Vec<*mut libusb_transfer>) -> Vec<Completion> {
        let mut slots = self.slots.lock();
        let mut completions = Vec::with_capacity(transfers.len());

        for transfer in transfers {
            let Some(slot) = slots
                .iter()
                .position(|raw| raw.transfer.as_ptr() == transfer)
            else {
                warn!("Completion for a transfer this queue doesn't own, ignoring");
                continue;
            };

            let Some(buffer) = slots[slot].buffer.take() else {
                warn!("Completion for slot {} which wasn't in flight", slot);
                continue;
            };

            let (status, length) = unsafe { ((*transfer).status, (*transfer).actual_length) };
            completions.push(Completion {
                slot,
                status: status_from_libusb(status),
                length: length.max(0) as usize,
                buffer,
            });
        }
        completions
    }

    fn in_flight(&self) -> usize {
        self.slots
            .lock()
            .iter()
            .filter(|raw| raw.buffer.is_some())
            .count()
    }
}

impl TransferQueue for LibusbQueue {
    fn submit(&self, slot: usize, mut buffer: Vec<u8>) -> Result<(), rusb::Error> {
        let mut slots = self.slots.lock();
        let raw = slots.get_mut(slot).ok_or(rusb::Error::InvalidParam)?;
        if raw.buffer.is_some() {
            return Err(rusb::Error::Busy);
        }
        let length = c_int::try_from(buffer.len()).map_err(|_| rusb::Error::InvalidParam)?;

        let result = unsafe {
            ffi::libusb_fill_bulk_transfer(
                raw.transfer.as_ptr(),
                self.handle.as_raw(),
                self.endpoint,
                buffer.as_mut_ptr(),
                length,
                transfer_callback,
                &*self.callback as *const CallbackData as *mut c_void,
                self.timeout,
            );
            ffi::libusb_submit_transfer(raw.transfer.as_ptr())
        };
        if result != 0 {
            return Err(error_from_libusb(result));
        }

        // Moving the Vec doesn't move its heap allocation, which is what libusb is writing to.
        raw.buffer = Some(buffer);
        Ok(())
    }

    fn cancel(&self, slot: usize) -> Result<(), rusb::Error> {
        let slots = self.slots.lock();
        let raw = slots.get(slot).ok_or(rusb::Error::InvalidParam)?;
        if raw.buffer.is_none() {
            return Err(rusb::Error::NotFound);
        }

        match unsafe { ffi::libusb_cancel_transfer(raw.transfer.as_ptr()) } {
            0 => Ok(()),
            err => Err(error_from_libusb(err)),
        }
    }

    fn wait(&self) -> Result<Vec<Completion>, rusb::Error> {
        loop {
            {
                let mut completed = self.callback.completed.lock();
                if !completed.is_empty() {
                    let transfers: Vec<_> = completed.drain(..).collect();
                    drop(completed);
                    return Ok(self.collect(transfers));
                }

                // Reset before looking at `woken`, so a wake landing in between still makes
                // libusb return straight away.
                self.callback.flag.store(0, Ordering::SeqCst);
                if self.woken.swap(false, Ordering::SeqCst) {
                    return Ok(Vec::new());
                }
            }

            let result = unsafe {
                ffi::libusb_handle_events_completed(self.context_raw(), self.callback.flag.as_ptr())
            };
            if result != 0 {
                return Err(error_from_libusb(result));
            }
        }
    }

    fn wake(&self) {
        self.woken.store(true, Ordering::SeqCst);
        self.callback.flag.store(1, Ordering::SeqCst);
        unsafe { ffi::libusb_interrupt_event_handler(self.context_raw()) };
    }
}

impl Drop for LibusbQueue {
    fn drop(&mut self) {
        // Cancel in reverse order so a later transfer can't sneak onto the bus after an
        // earlier one was cancelled.
        for slot in (0..self.slots.lock().len()).rev() {
            match self.cancel(slot) {
                Ok(()) | Err(rusb::Error::NotFound) => {}
                Err(error) => debug!("Unable to cancel slot {} on drop: {}", slot, error),
            }
        }

        while self.in_flight() > 0 {
            if let Err(error) = self.wait() {
                warn!("Abandoning {} in flight transfers: {}", self.in_flight(), error);
                // libusb still references these, leaking them is the only safe option.
                for raw in self.slots.lock().drain(..) {
                    if let Some(buffer) = raw.buffer {
                        std::mem::forget(buffer);
                    }
                }
                return;
            }
        }

        for raw in self.slots.lock().drain(..) {
            unsafe { ffi::libusb_free_transfer(raw.transfer.as_ptr()) };
        }
    }
}
