//! Continuous bulk acquisition.
//!
//! An [`Acquisition`] keeps a fixed number of bulk transfers queued against the scope's data
//! endpoint. Every completed transfer is handed to the caller's handler and then resubmitted
//! with the same buffer, so the device always has somewhere to put its next block.
//!
//! The engine doesn't spawn anything. Someone has to call [`Acquisition::pump`] in a loop,
//! normally on its own thread, while [`Acquisition::stop`] can be called from anywhere:
//!
//! ```no_run
//! # use hantek_usb::acquisition::{Acquisition, AcquisitionConfig};
//! # use hantek_usb::session::Session;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = Session::open(0)?;
//! session.start()?;
//!
//! let mut captured = 0;
//! let config = AcquisitionConfig { buffer_size: 16384, concurrency: 8 };
//! let engine = Acquisition::start(&mut session, config, |data: &[u8]| captured += data.len(), None)?;
//!
//! std::thread::scope(|scope| {
//!     scope.spawn(|| {
//!         while engine.is_streaming() {
//!             if engine.pump().is_err() {
//!                 break;
//!             }
//!         }
//!     });
//!
//!     std::thread::sleep(std::time::Duration::from_secs(1));
//!     engine.stop()
//! })?;
//! # Ok(())
//! # }
//! ```
use crate::device::base::{Completion, ScopeTransport, TransferQueue, TransferStatus};
use crate::error::{AcquisitionError, TransferError};
use crate::session::{Session, SessionState};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AcquisitionConfig {
    /// Bytes per transfer.
    pub buffer_size: usize,

    /// Number of transfers kept in flight.
    pub concurrency: usize,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 16 * 1024,
            concurrency: 8,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EngineState {
    Created,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SlotState {
    Submitted,
    Completed,
    Retired,
}

/// Reported on the optional event channel. These never fail `pump`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AcquisitionEvent {
    TransferFailed(TransferError),
    SlotRetired { slot: usize, error: rusb::Error },

    /// Every slot has been retired. Nothing more will arrive.
    Exhausted,
}

/// Receives each completed buffer. The slice is only valid for the duration of the call, the
/// slot is resubmitted as soon as this returns.
pub trait SampleHandler: Send {
    fn handle(&mut self, data: &[u8]);
}

impl<F: FnMut(&[u8]) + Send> SampleHandler for F {
    fn handle(&mut self, data: &[u8]) {
        self(data)
    }
}

struct Pool<'h> {
    state: EngineState,
    slots: Vec<SlotState>,
    live: usize,
    fault: Option<rusb::Error>,
    handler: Box<dyn SampleHandler + 'h>,
}

impl Pool<'_> {
    fn retire(&mut self, slot: usize) {
        if self.slots[slot] != SlotState::Retired {
            self.slots[slot] = SlotState::Retired;
            self.live -= 1;
        }
    }
}

pub struct Acquisition<'s, T: ScopeTransport> {
    session: &'s mut Session<T>,
    queue: T::Queue,
    config: AcquisitionConfig,
    snapshot: SessionState,

    // Pool membership and the handler. Completions are processed with this held, and stop()
    // takes it to switch to Draining, so no handler call can begin after that switch.
    pool: Mutex<Pool<'s>>,

    // Held by whoever is waiting on the queue, pump() or the drain at the end of stop().
    dispatch: Mutex<()>,

    stopping: AtomicBool,
    completions: AtomicU64,
    events: Option<UnboundedSender<AcquisitionEvent>>,
}

impl<'s, T: ScopeTransport> Acquisition<'s, T> {
    /// Allocates `concurrency` buffers of `buffer_size` bytes and submits all of them.
    ///
    /// The session should already be sampling. Per-slot failures are sent to `events` (if
    /// given) as well as logged.
    pub fn start<H>(
        session: &'s mut Session<T>,
        config: AcquisitionConfig,
        handler: H,
        events: Option<UnboundedSender<AcquisitionEvent>>,
    ) -> Result<Self, AcquisitionError>
    where
        H: SampleHandler + 's,
    {
        if config.buffer_size == 0 {
            return Err(AcquisitionError::InvalidBufferSize);
        }
        if config.concurrency == 0 {
            return Err(AcquisitionError::InvalidConcurrency);
        }

        let snapshot = session.state();
        if !snapshot.sampling {
            warn!("Starting acquisition while the scope isn't sampling");
        }

        let queue = session
            .transport()
            .transfer_queue(config.concurrency)
            .map_err(AcquisitionError::QueueAllocation)?;

        let engine = Self {
            session,
            queue,
            config,
            snapshot,
            pool: Mutex::new(Pool {
                state: EngineState::Created,
                slots: vec![SlotState::Retired; config.concurrency],
                live: 0,
                fault: None,
                handler: Box::new(handler),
            }),
            dispatch: Mutex::new(()),
            stopping: AtomicBool::new(false),
            completions: AtomicU64::new(0),
            events,
        };

        let failure = {
            let mut pool = engine.pool.lock();
            let mut failure = None;
            for slot in 0..config.concurrency {
                let buffer = vec![0; config.buffer_size];
                if let Err(error) = engine.queue.submit(slot, buffer) {
                    failure = Some(AcquisitionError::Submit { slot, error });
                    break;
                }
                pool.slots[slot] = SlotState::Submitted;
                pool.live += 1;
            }
            if failure.is_none() {
                pool.state = EngineState::Running;
            }
            failure
        };

        if let Some(failure) = failure {
            error!("{}", failure);
            if let Err(error) = engine.stop() {
                warn!("Unable to drain transfers after failed start: {}", error);
            }
            return Err(failure);
        }

        info!(
            "Acquisition running: {} transfers of {} bytes at {}",
            config.concurrency,
            config.buffer_size,
            snapshot
                .sample_rate
                .map_or_else(|| "unknown rate".to_string(), |rate| rate.to_string())
        );
        Ok(engine)
    }

    /// Blocks until the transport reports at least one finished transfer, then processes
    /// everything it reported. Returns how many transfers were processed.
    ///
    /// Busy, timeout, overflow and interrupted errors from the event wait are retried here.
    /// Anything else, or a transfer reporting the scope gone, is returned once as `Fatal`,
    /// after which the engine stops streaming.
    /// Returns `Ok(0)` straight away once the engine isn't streaming, and may return `Ok(0)`
    /// when woken by `stop`.
    pub fn pump(&self) -> Result<usize, AcquisitionError> {
        if !self.is_streaming() {
            return Ok(0);
        }

        let _dispatch = self.dispatch.lock();
        let completions = loop {
            if self.stopping.load(Ordering::SeqCst) {
                return Ok(0);
            }

            match self.queue.wait() {
                Ok(completions) => break completions,
                Err(error) if is_transient(error) => {
                    debug!("Retrying USB event handling after: {}", error);
                }
                Err(error) => {
                    let mut pool = self.pool.lock();
                    if pool.fault.is_some() {
                        return Ok(0);
                    }
                    pool.fault = Some(error);
                    error!("USB event handling failed: {}", error);
                    return Err(AcquisitionError::Fatal(error));
                }
            }
        };

        let processed = completions.len();
        let mut pool = self.pool.lock();
        let faulted = pool.fault.is_some();
        for completion in completions {
            self.complete(&mut pool, completion);
        }

        // A disconnect seen during completion processing ends the stream like a failed wait.
        match pool.fault {
            Some(error) if !faulted => Err(AcquisitionError::Fatal(error)),
            _ => Ok(processed),
        }
    }

    /// Cancels every live transfer and waits until all of them have come back. Safe to call
    /// while another thread is inside `pump`, which will return promptly. Calling it again
    /// once stopped does nothing.
    pub fn stop(&self) -> Result<(), AcquisitionError> {
        {
            let mut pool = self.pool.lock();
            match pool.state {
                EngineState::Stopped => return Ok(()),
                EngineState::Draining => {}
                EngineState::Created | EngineState::Running => {
                    pool.state = EngineState::Draining;
                    self.stopping.store(true, Ordering::SeqCst);
                    debug!("Cancelling {} transfers", pool.live);

                    for slot in (0..pool.slots.len()).rev() {
                        if pool.slots[slot] != SlotState::Submitted {
                            continue;
                        }
                        match self.queue.cancel(slot) {
                            // NotFound means it already finished, the completion is on its way.
                            Ok(()) | Err(rusb::Error::NotFound) => {}
                            Err(error) => warn!("Unable to cancel slot {}: {}", slot, error),
                        }
                    }
                }
            }
        }
        self.queue.wake();

        let _dispatch = self.dispatch.lock();
        let mut result = Ok(());
        while self.pool.lock().live > 0 {
            match self.queue.wait() {
                Ok(completions) => {
                    let mut pool = self.pool.lock();
                    for completion in completions {
                        self.complete(&mut pool, completion);
                    }
                }
                Err(error) if is_transient(error) => {
                    debug!("Retrying USB event handling after: {}", error);
                }
                Err(error) => {
                    error!("USB event handling failed while stopping: {}", error);
                    let mut pool = self.pool.lock();
                    for slot in 0..pool.slots.len() {
                        pool.retire(slot);
                    }
                    result = Err(AcquisitionError::Fatal(error));
                }
            }
        }

        self.pool.lock().state = EngineState::Stopped;
        info!(
            "Acquisition stopped after {} transfers",
            self.completions.load(Ordering::SeqCst)
        );
        result
    }

    fn complete(&self, pool: &mut Pool<'s>, completion: Completion) {
        let slot = completion.slot;
        let status = completion.status;

        if pool.slots.get(slot) != Some(&SlotState::Submitted) {
            warn!("Completion for slot {} which wasn't submitted, dropping", slot);
            return;
        }
        pool.slots[slot] = SlotState::Completed;

        // Once stopping or faulted, everything that comes back is retired and its buffer freed,
        // whatever its status.
        if pool.state != EngineState::Running || pool.fault.is_some() {
            pool.retire(slot);
            debug!("Slot {} retired ({}), {} left", slot, status, pool.live);
            return;
        }

        match status {
            TransferStatus::Completed => {
                pool.handler.handle(completion.data());
                self.completions.fetch_add(1, Ordering::SeqCst);
            }
            TransferStatus::NoDevice => {
                pool.retire(slot);
                self.disconnected(pool);
                return;
            }
            status => {
                let error = TransferError { slot, status };
                warn!("{}", error);
                self.report(AcquisitionEvent::TransferFailed(error));
            }
        }

        if let Err(error) = self.queue.submit(slot, completion.buffer) {
            pool.retire(slot);
            if error == rusb::Error::NoDevice {
                self.disconnected(pool);
                return;
            }

            warn!(
                "Unable to resubmit slot {}, retiring it ({} of {} left): {}",
                slot, pool.live, self.config.concurrency, error
            );
            self.report(AcquisitionEvent::SlotRetired { slot, error });

            if pool.live == 0 {
                error!("Every transfer has been retired, acquisition can't continue");
                self.report(AcquisitionEvent::Exhausted);
            }
            return;
        }
        pool.slots[slot] = SlotState::Submitted;
    }

    fn disconnected(&self, pool: &mut Pool<'s>) {
        if pool.fault.is_none() {
            error!("Scope disconnected, acquisition can't continue");
            pool.fault = Some(rusb::Error::NoDevice);
        }
    }

    fn report(&self, event: AcquisitionEvent) {
        if let Some(events) = &self.events {
            // Nobody listening isn't our problem.
            let _ = events.send(event);
        }
    }

    pub fn state(&self) -> EngineState {
        self.pool.lock().state
    }

    /// Slots still taking part in acquisition. Drops by one for every retired slot, and reaches
    /// zero once stopped.
    pub fn live_slots(&self) -> usize {
        self.pool.lock().live
    }

    pub fn slot_states(&self) -> Vec<SlotState> {
        self.pool.lock().slots.clone()
    }

    /// Successful completions handed to the handler so far. Usable as a sequence number.
    pub fn completions(&self) -> u64 {
        self.completions.load(Ordering::SeqCst)
    }

    /// The fatal error returned by `pump`, if there was one.
    pub fn fault(&self) -> Option<rusb::Error> {
        self.pool.lock().fault
    }

    /// True while running with at least one live slot and no fatal error.
    pub fn is_streaming(&self) -> bool {
        let pool = self.pool.lock();
        pool.state == EngineState::Running && pool.live > 0 && pool.fault.is_none()
    }

    pub fn config(&self) -> AcquisitionConfig {
        self.config
    }

    /// Session settings as they were when acquisition started.
    pub fn session_state(&self) -> SessionState {
        self.snapshot
    }

    pub fn session(&self) -> &Session<T> {
        &*self.session
    }
}

impl<T: ScopeTransport> Drop for Acquisition<'_, T> {
    fn drop(&mut self) {
        if let Err(error) = self.stop() {
            warn!("Error while stopping acquisition: {}", error);
        }
    }
}

fn is_transient(error: rusb::Error) -> bool {
    matches!(
        error,
        rusb::Error::Busy | rusb::Error::Timeout | rusb::Error::Overflow | rusb::Error::Interrupted
    )
}
