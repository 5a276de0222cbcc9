#[cfg(feature = "clap")]
use clap::ValueEnum;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt::Formatter;
use strum::{Display, EnumCount, EnumIter, IntoEnumIterator};

// The 6022 firmware only understands these discrete sample rate codes. Codes below 0x0a
// are megasamples per second, the three larger ones are hundreds of kilosamples.
#[derive(Copy, Clone, Debug, Display, EnumIter, EnumCount, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "clap", derive(ValueEnum))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SampleRate {
    #[strum(to_string = "100 kS/s")]
    Khz100 = 0x0a,
    #[strum(to_string = "200 kS/s")]
    Khz200 = 0x14,
    #[strum(to_string = "500 kS/s")]
    Khz500 = 0x32,
    #[strum(to_string = "1 MS/s")]
    Mhz1 = 0x01,
    #[strum(to_string = "4 MS/s")]
    Mhz4 = 0x04,
    #[strum(to_string = "8 MS/s")]
    Mhz8 = 0x08,
    #[strum(to_string = "16 MS/s")]
    Mhz16 = 0x10,
    #[strum(to_string = "24 MS/s")]
    Mhz24 = 0x18,
    #[strum(to_string = "30 MS/s")]
    Mhz30 = 0x1e,
    #[strum(to_string = "48 MS/s")]
    Mhz48 = 0x30,
}

impl SampleRate {
    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        SampleRate::iter().find(|rate| rate.code() == code)
    }

    pub fn samples_per_second(&self) -> u32 {
        match self {
            SampleRate::Khz100 => 100_000,
            SampleRate::Khz200 => 200_000,
            SampleRate::Khz500 => 500_000,
            _ => self.code() as u32 * 1_000_000,
        }
    }
}

#[derive(Copy, Clone, Debug, Display, EnumIter, EnumCount, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "clap", derive(ValueEnum))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum VoltageRange {
    #[strum(to_string = "±5 V")]
    Volts5 = 0x01,
    #[strum(to_string = "±2.5 V")]
    Volts2_5 = 0x02,
    #[strum(to_string = "±1 V")]
    Volts1 = 0x05,
    #[strum(to_string = "±500 mV")]
    Millivolts500 = 0x0a,
}

impl VoltageRange {
    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        VoltageRange::iter().find(|range| range.code() == code)
    }

    /// Half of the full scale, in millivolts.
    pub fn millivolts(&self) -> u32 {
        match self {
            VoltageRange::Volts5 => 5000,
            VoltageRange::Volts2_5 => 2500,
            VoltageRange::Volts1 => 1000,
            VoltageRange::Millivolts500 => 500,
        }
    }
}

#[derive(Copy, Clone, Debug, Display, EnumIter, EnumCount, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "clap", derive(ValueEnum))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ChannelCount {
    Single = 0x01,
    Dual = 0x02,
}

impl ChannelCount {
    pub fn count(&self) -> u8 {
        *self as u8
    }

    pub fn from_count(count: u8) -> Option<Self> {
        match count {
            1 => Some(ChannelCount::Single),
            2 => Some(ChannelCount::Dual),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, EnumCount, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "clap", derive(ValueEnum))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Channel {
    One = 0x01,
    Two = 0x02,
}

impl Channel {
    pub fn number(&self) -> u8 {
        *self as u8
    }

    pub fn from_number(number: u8) -> Option<Self> {
        match number {
            1 => Some(Channel::One),
            2 => Some(Channel::Two),
            _ => None,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "CH{}", self.number())
    }
}
