pub mod device;
mod queue;

pub use queue::LibusbQueue;
