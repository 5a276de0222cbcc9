use clap::{Parser, ValueEnum};
use hantek_types::{ChannelCount, SampleRate, VoltageRange};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(about, version, author)]
pub struct Cli {
    /// File the raw samples are written to (interleaved CH1/CH2 when both are enabled)
    #[clap(required_unless_present = "list")]
    pub output: Option<PathBuf>,

    /// List attached scopes and exit
    #[clap(long)]
    pub list: bool,

    /// Minimum log level to print out
    #[clap(long, value_enum, default_value = "info")]
    pub log_level: LevelFilter,

    /// JSON capture profile, any option given here overrides it
    #[clap(long)]
    pub profile: Option<PathBuf>,

    /// Which attached scope to use, counting from zero
    #[clap(long)]
    pub device: Option<usize>,

    #[clap(long, value_enum)]
    pub channels: Option<ChannelCount>,

    #[clap(long, value_enum)]
    pub sample_rate: Option<SampleRate>,

    /// Voltage range for channel 1
    #[clap(long, value_enum)]
    pub range_ch1: Option<VoltageRange>,

    /// Voltage range for channel 2, only sent when given
    #[clap(long, value_enum)]
    pub range_ch2: Option<VoltageRange>,

    /// Number of bytes to capture
    #[clap(long)]
    pub bytes: Option<usize>,

    /// How long to let the scope settle after starting, in milliseconds
    #[clap(long)]
    pub settle_ms: Option<u64>,

    #[clap(long, value_enum)]
    pub mode: Option<CaptureMode>,

    /// Bytes per transfer when streaming
    #[clap(long)]
    pub buffer_size: Option<usize>,

    /// Transfers kept in flight when streaming
    #[clap(long)]
    pub transfers: Option<usize>,
}

#[derive(ValueEnum, Copy, Clone, Eq, PartialEq, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// A single blocking bulk read
    Sync,
    /// Continuous acquisition with several transfers in flight
    Stream,
}

#[repr(usize)]
#[derive(ValueEnum, Copy, Clone, Eq, PartialEq, Debug)]
pub enum LevelFilter {
    /// A level lower than all log levels.
    Off,
    /// Corresponds to the `Error` log level.
    Error,
    /// Corresponds to the `Warn` log level.
    Warn,
    /// Corresponds to the `Info` log level.
    Info,
    /// Corresponds to the `Debug` log level.
    Debug,
    /// Corresponds to the `Trace` log level.
    Trace,
}

impl From<LevelFilter> for log::LevelFilter {
    fn from(level: LevelFilter) -> Self {
        match level {
            LevelFilter::Off => log::LevelFilter::Off,
            LevelFilter::Error => log::LevelFilter::Error,
            LevelFilter::Warn => log::LevelFilter::Warn,
            LevelFilter::Info => log::LevelFilter::Info,
            LevelFilter::Debug => log::LevelFilter::Debug,
            LevelFilter::Trace => log::LevelFilter::Trace,
        }
    }
}
