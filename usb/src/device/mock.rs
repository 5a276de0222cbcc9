// A scripted stand-in for the scope. Control requests are recorded, and bulk transfers sit in
// flight until a test completes or fails them, in the order they were submitted.
use crate::device::base::{Completion, ScopeTransport, TransferQueue, TransferStatus};
use crate::error::CommandError;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlCall {
    pub request: u8,
    pub data: Vec<u8>,
}

#[derive(Default)]
struct QueueState {
    slots: usize,
    in_flight: VecDeque<(usize, Vec<u8>)>,
    completed: VecDeque<Completion>,
    submissions: HashMap<usize, usize>,
    rejected: HashMap<usize, rusb::Error>,
    wait_errors: VecDeque<rusb::Error>,
    woken: bool,
    waiting: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<QueueState>,
    changed: Condvar,
}

#[derive(Default)]
struct Inner {
    calls: Mutex<Vec<ControlCall>>,
    control_error: Mutex<Option<rusb::Error>>,
    bulk_data: Mutex<Vec<u8>>,
    bulk_error: Mutex<Option<(rusb::Error, usize)>>,
    released: Mutex<bool>,
    queue: Arc<Shared>,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn control_calls(&self) -> Vec<ControlCall> {
        self.inner.calls.lock().clone()
    }

    pub fn control_count(&self) -> usize {
        self.inner.calls.lock().len()
    }

    pub fn fail_control(&self, error: rusb::Error) {
        *self.inner.control_error.lock() = Some(error);
    }

    pub fn set_bulk_data(&self, data: Vec<u8>) {
        *self.inner.bulk_data.lock() = data;
    }

    pub fn fail_bulk(&self, error: rusb::Error, transferred: usize) {
        *self.inner.bulk_error.lock() = Some((error, transferred));
    }

    pub fn is_released(&self) -> bool {
        *self.inner.released.lock()
    }

    pub fn allocated_slots(&self) -> usize {
        self.inner.queue.state.lock().slots
    }

    pub fn in_flight(&self) -> usize {
        self.inner.queue.state.lock().in_flight.len()
    }

    pub fn submissions(&self, slot: usize) -> usize {
        self.inner
            .queue
            .state
            .lock()
            .submissions
            .get(&slot)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_submissions(&self) -> usize {
        self.inner.queue.state.lock().submissions.values().sum()
    }

    /// Refuses every future submission on `slot`.
    pub fn reject_submissions(&self, slot: usize) {
        self.reject_submissions_with(slot, rusb::Error::Io);
    }

    pub fn reject_submissions_with(&self, slot: usize, error: rusb::Error) {
        self.inner.queue.state.lock().rejected.insert(slot, error);
    }

    pub fn fail_next_wait(&self, error: rusb::Error) {
        let mut state = self.inner.queue.state.lock();
        state.wait_errors.push_back(error);
        self.inner.queue.changed.notify_all();
    }

    /// Fills the oldest in-flight transfer with `data` and completes it, returning its slot.
    pub fn complete_next(&self, data: &[u8]) -> Option<usize> {
        self.finish_next(TransferStatus::Completed, data)
    }

    /// Completes the oldest in-flight transfer with an error status, returning its slot.
    pub fn fail_next(&self, status: TransferStatus) -> Option<usize> {
        self.finish_next(status, &[])
    }

    /// True once a thread is parked inside `wait`.
    pub fn has_waiter(&self) -> bool {
        self.inner.queue.state.lock().waiting
    }

    fn finish_next(&self, status: TransferStatus, data: &[u8]) -> Option<usize> {
        let mut state = self.inner.queue.state.lock();
        let (slot, mut buffer) = state.in_flight.pop_front()?;

        let length = data.len().min(buffer.len());
        buffer[..length].copy_from_slice(&data[..length]);
        state.completed.push_back(Completion {
            slot,
            status,
            length,
            buffer,
        });

        self.inner.queue.changed.notify_all();
        Some(slot)
    }
}

impl ScopeTransport for MockTransport {
    type Queue = MockQueue;

    fn write_control(&self, request: u8, data: &[u8]) -> Result<usize, rusb::Error> {
        self.inner.calls.lock().push(ControlCall {
            request,
            data: data.to_vec(),
        });
        match *self.inner.control_error.lock() {
            Some(error) => Err(error),
            None => Ok(data.len()),
        }
    }

    fn read_bulk(&self, buffer: &mut [u8]) -> Result<usize, CommandError> {
        if let Some((error, transferred)) = *self.inner.bulk_error.lock() {
            return if transferred > 0 {
                Err(CommandError::PartialTransfer { transferred, error })
            } else {
                Err(CommandError::UsbError(error))
            };
        }

        let data = self.inner.bulk_data.lock();
        let length = data.len().min(buffer.len());
        buffer[..length].copy_from_slice(&data[..length]);
        Ok(length)
    }

    fn transfer_queue(&self, slots: usize) -> Result<Self::Queue, rusb::Error> {
        self.inner.queue.state.lock().slots = slots;
        Ok(MockQueue {
            shared: self.inner.queue.clone(),
        })
    }

    fn release(&mut self) -> Result<(), rusb::Error> {
        *self.inner.released.lock() = true;
        Ok(())
    }
}

pub struct MockQueue {
    shared: Arc<Shared>,
}

impl TransferQueue for MockQueue {
    fn submit(&self, slot: usize, buffer: Vec<u8>) -> Result<(), rusb::Error> {
        let mut state = self.shared.state.lock();
        if slot >= state.slots {
            return Err(rusb::Error::InvalidParam);
        }
        if let Some(error) = state.rejected.get(&slot) {
            return Err(*error);
        }

        *state.submissions.entry(slot).or_default() += 1;
        state.in_flight.push_back((slot, buffer));
        Ok(())
    }

    fn cancel(&self, slot: usize) -> Result<(), rusb::Error> {
        let mut state = self.shared.state.lock();
        let position = state
            .in_flight
            .iter()
            .position(|(in_flight, _)| *in_flight == slot)
            .ok_or(rusb::Error::NotFound)?;

        if let Some((slot, buffer)) = state.in_flight.remove(position) {
            state.completed.push_back(Completion {
                slot,
                status: TransferStatus::Cancelled,
                length: 0,
                buffer,
            });
        }
        self.shared.changed.notify_all();
        Ok(())
    }

    fn wait(&self) -> Result<Vec<Completion>, rusb::Error> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(error) = state.wait_errors.pop_front() {
                return Err(error);
            }
            if !state.completed.is_empty() {
                return Ok(state.completed.drain(..).collect());
            }
            if state.woken {
                state.woken = false;
                return Ok(Vec::new());
            }

            state.waiting = true;
            self.shared.changed.wait(&mut state);
            state.waiting = false;
        }
    }

    fn wake(&self) {
        self.shared.state.lock().woken = true;
        self.shared.changed.notify_all();
    }
}
