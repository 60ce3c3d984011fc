use btleplug;
use thiserror::Error;

use crate::device::types::FailureReason;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("Failed to scan for devices (btleplug): {source}")]
    Scan { source: btleplug::Error },

    #[error("Error communicating with device (btleplug): {source}")]
    Connection { source: btleplug::Error },

    #[error("The bluetooth adapter event stream ended unexpectedly")]
    EventStreamClosed,

    #[error("The session cannot make further progress: {reason}")]
    Stalled { reason: FailureReason },
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to run device session: {source}")]
    Device { #[from] source: DeviceError },
}
