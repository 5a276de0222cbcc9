use crate::cli::{CaptureMode, Cli};
use anyhow::{Context, Result};
use hantek_types::{ChannelCount, SampleRate, VoltageRange};
use hantek_usb::session::SETTLE_DELAY;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

/// Everything a capture needs. Loaded from a JSON profile when one is given, then overridden
/// by whatever was passed on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub device: usize,
    pub channels: ChannelCount,
    pub sample_rate: SampleRate,
    pub range_ch1: VoltageRange,
    pub range_ch2: Option<VoltageRange>,
    pub bytes: usize,
    pub settle_ms: u64,
    pub mode: CaptureMode,
    pub buffer_size: usize,
    pub transfers: usize,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            device: 0,
            channels: ChannelCount::Single,
            sample_rate: SampleRate::Mhz1,
            range_ch1: VoltageRange::Millivolts500,
            range_ch2: None,
            bytes: 8 * 1024 * 1024,
            settle_ms: SETTLE_DELAY.as_millis() as u64,
            mode: CaptureMode::Stream,
            buffer_size: 16 * 1024,
            transfers: 8,
        }
    }
}

impl Profile {
    pub fn read(path: &Path) -> Result<Profile> {
        let reader = File::open(path).context(format!(
            "Could not open capture profile for reading at {}",
            path.to_string_lossy()
        ))?;
        serde_json::from_reader(reader).context(format!(
            "Could not parse capture profile at {}",
            path.to_string_lossy()
        ))
    }

    pub fn apply(&mut self, args: &Cli) {
        if let Some(device) = args.device {
            self.device = device;
        }
        if let Some(channels) = args.channels {
            self.channels = channels;
        }
        if let Some(sample_rate) = args.sample_rate {
            self.sample_rate = sample_rate;
        }
        if let Some(range) = args.range_ch1 {
            self.range_ch1 = range;
        }
        if args.range_ch2.is_some() {
            self.range_ch2 = args.range_ch2;
        }
        if let Some(bytes) = args.bytes {
            self.bytes = bytes;
        }
        if let Some(settle_ms) = args.settle_ms {
            self.settle_ms = settle_ms;
        }
        if let Some(mode) = args.mode {
            self.mode = mode;
        }
        if let Some(buffer_size) = args.buffer_size {
            self.buffer_size = buffer_size;
        }
        if let Some(transfers) = args.transfers {
            self.transfers = transfers;
        }
    }
}
