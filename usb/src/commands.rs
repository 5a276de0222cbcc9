use hantek_types::Channel;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    SetVoltageRange(Channel),
    SetSampleRate,
    StartStop,
    SetChannelCount,
}

impl Command {
    pub fn request(&self) -> u8 {
        match self {
            Command::SetVoltageRange(Channel::One) => 0xe0,
            Command::SetVoltageRange(Channel::Two) => 0xe1,
            Command::SetSampleRate => 0xe2,
            Command::StartStop => 0xe3,
            Command::SetChannelCount => 0xe4,
        }
    }
}
