use crate::commands::Command;
use crate::device::base::ScopeTransport;
use crate::device::{TransportOptions, UsbTransport};
use crate::error::{CommandError, ConnectError};
use hantek_types::{Channel, ChannelCount, SampleRate, VoltageRange};
use log::{debug, info};
use std::time::Duration;

/// How long the custom firmware needs after `start` before bulk reads are safe. Reading any
/// earlier can hang the scope. Nothing in this crate waits for it, the caller has to.
pub const SETTLE_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub channel_count: Option<ChannelCount>,
    pub sample_rate: Option<SampleRate>,
    pub voltage_range: [Option<VoltageRange>; 2],
    pub sampling: bool,
}

/// An open connection to one Hantek 6022.
///
/// Settings are only recorded once the scope has accepted them, so `state()` never reports
/// something the device hasn't been told. An `Acquisition` borrows the session mutably for its
/// whole lifetime, which keeps `read_sync` and reconfiguration away from a running stream.
pub struct Session<T: ScopeTransport> {
    transport: T,
    state: SessionState,
}

impl Session<UsbTransport> {
    /// Opens the `index`th attached scope (counting from zero).
    pub fn open(index: usize) -> Result<Self, ConnectError> {
        Self::open_with(index, TransportOptions::default())
    }

    pub fn open_with(index: usize, options: TransportOptions) -> Result<Self, ConnectError> {
        let transport = UsbTransport::open(index, options)?;
        Ok(Self::new(transport))
    }
}

impl<T: ScopeTransport> Session<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: SessionState::default(),
        }
    }

    pub(crate) fn transport(&self) -> &T {
        &self.transport
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn channel_count(&self) -> Option<ChannelCount> {
        self.state.channel_count
    }

    pub fn sample_rate(&self) -> Option<SampleRate> {
        self.state.sample_rate
    }

    pub fn voltage_range(&self, channel: Channel) -> Option<VoltageRange> {
        self.state.voltage_range[channel as usize - 1]
    }

    pub fn is_sampling(&self) -> bool {
        self.state.sampling
    }

    /// Enables channel 1 only (`1`) or both channels (`2`). Needs the custom firmware.
    pub fn set_channel_count(&mut self, count: u8) -> Result<(), CommandError> {
        let channels =
            ChannelCount::from_count(count).ok_or(CommandError::InvalidChannelCount(count))?;

        self.send(Command::SetChannelCount, channels.count())?;
        self.state.channel_count = Some(channels);
        Ok(())
    }

    pub fn set_sample_rate(&mut self, code: u8) -> Result<(), CommandError> {
        let rate = SampleRate::from_code(code).ok_or(CommandError::InvalidSampleRate(code))?;

        self.send(Command::SetSampleRate, rate.code())?;
        self.state.sample_rate = Some(rate);
        Ok(())
    }

    pub fn set_voltage_range(&mut self, code: u8, channel: u8) -> Result<(), CommandError> {
        let range = VoltageRange::from_code(code).ok_or(CommandError::InvalidVoltageRange(code))?;
        let channel = Channel::from_number(channel).ok_or(CommandError::InvalidChannel(channel))?;

        self.send(Command::SetVoltageRange(channel), range.code())?;
        self.state.voltage_range[channel as usize - 1] = Some(range);
        Ok(())
    }

    /// Clears the scope's FIFO and starts sampling. This doesn't trigger, triggering is left to
    /// whoever reads the data. Wait `SETTLE_DELAY` before reading.
    pub fn start(&mut self) -> Result<(), CommandError> {
        self.send(Command::StartStop, 0x01)?;
        self.state.sampling = true;
        info!("Sampling started");
        Ok(())
    }

    /// Stops sampling. Needs the custom firmware.
    pub fn stop(&mut self) -> Result<(), CommandError> {
        self.send(Command::StartStop, 0x00)?;
        self.state.sampling = false;
        info!("Sampling stopped");
        Ok(())
    }

    /// One blocking bulk read into `buffer`, returning how many bytes arrived.
    pub fn read_sync(&mut self, buffer: &mut [u8]) -> Result<usize, CommandError> {
        let transferred = self.transport.read_bulk(buffer)?;
        debug!("Read {} of {} bytes", transferred, buffer.len());
        Ok(transferred)
    }

    /// Releases the device. Dropping the session does the same, without the error.
    pub fn close(mut self) -> Result<(), rusb::Error> {
        self.transport.release()
    }

    fn send(&self, command: Command, value: u8) -> Result<(), CommandError> {
        let data = [value];
        let written = self.transport.write_control(command.request(), &data)?;
        if written != data.len() {
            return Err(CommandError::ShortWrite {
                expected: data.len(),
                written,
            });
        }
        Ok(())
    }
}
