pub use hantek_types;
pub use rusb;

pub mod acquisition;
pub mod commands;
pub mod error;
pub mod session;

pub mod device;

pub const VID_HANTEK: u16 = 0x04b5;
pub const PID_HANTEK_6022: u16 = 0x6022;

/// Sample data comes in on this bulk endpoint.
pub const BULK_ENDPOINT: u8 = 0x86;
