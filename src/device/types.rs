use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::device::constants::{DEVICE_NAME_FILTER, SCAN_TIMEOUT};

/**
 * Why a session stopped making progress. Carried by the Failed state and by
 * the error returned from the driver.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    NoMatchingDevice,
    ServiceMissing,
    CharacteristicMissing,
    DescriptorMissing,
    Disconnected,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NoMatchingDevice => {
                write!(f, "no matching device was discovered before the scan finished")
            },
            FailureReason::ServiceMissing => {
                write!(f, "the device does not advertise the vitals service")
            },
            FailureReason::CharacteristicMissing => {
                write!(f, "the vitals service has no data characteristic")
            },
            FailureReason::DescriptorMissing => {
                write!(f, "the data characteristic has no client configuration descriptor")
            },
            FailureReason::Disconnected => {
                write!(f, "the peripheral disconnected")
            },
        }
    }
}

/**
 * The phase the session is in. A phase covers both the milestone and the
 * operation issued on reaching it (Connecting means a matching device was
 * found and a connect request is out, and so on).
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Scanning,
    Connecting,
    DiscoveringServices,
    DiscoveringDetails,
    SubscribingNotifications,
    Streaming,
    Failed(FailureReason),
}

// One characteristic of the vitals service, as reported by detail discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub descriptors: Vec<Uuid>,
}

/**
 * Everything the BLE stack can tell the session. Vendor errors carry their
 * stringified error so the session stays independent of btleplug types.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    DeviceDiscovered { name: String },
    ScanError { message: String },
    ScanFinished,
    Connected,
    Disconnected,
    ConnectionError { message: String },
    ServiceDiscovered { uuid: Uuid },
    DiscoveryFinished,
    DetailsDiscovered { characteristics: Vec<GattCharacteristic> },
    ServiceError { message: String },
    DescriptorWritten { value: Vec<u8> },
    CharacteristicChanged { uuid: Uuid, value: Vec<u8> },
}

/**
 * An operation the session asks the driver to perform.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect,
    DiscoverServices,
    DiscoverDetails,
    WriteDescriptor {
        characteristic: Uuid,
        descriptor: Uuid,
        value: [u8; 2],
    },
    ReportPayload { value: Vec<u8> },
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub name_filter: String,
    pub scan_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            name_filter: DEVICE_NAME_FILTER.to_string(),
            scan_timeout: Duration::from_millis(SCAN_TIMEOUT),
        }
    }
}
