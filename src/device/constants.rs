use uuid::Uuid;

/**
 * The peripheral is selected by advertised name: the first discovered device
 * whose local name contains this text (case-sensitive) is used.
 */
pub const DEVICE_NAME_FILTER: &str = "BerryMed";

/**
 * How long (milliseconds) the low energy scan runs before giving up.
 */
pub const SCAN_TIMEOUT: u64 = 10_000;

/**
 * How long (milliseconds) a write to the configuration descriptor may take.
 */
pub const WRITE_DEADLINE: u64 = 2000;

/**
 * The UUID of the Bluetooth BLE service carrying the oximeter's vital-sign data.
 */
pub const VITALS_SERVICE: &str = "49535343-fe7d-4ae5-8fa9-9fafd205e455";

/**
 * The UUID of the Bluetooth BLE remote GATT characteristic that notifies
 * vital-sign payloads.
 */
pub const VITALS_DATA_CHARACTERISTIC: &str = "49535343-1e4d-4bd9-ba61-23c647249616";

/**
 * The UUID of the standard client characteristic configuration descriptor.
 */
pub const CLIENT_CONFIGURATION_DESCRIPTOR: &str = "00002902-0000-1000-8000-00805f9b34fb";

pub const NOTIFICATIONS_ENABLE: [u8; 2] = [0x01, 0x00];
pub const NOTIFICATIONS_DISABLE: [u8; 2] = [0x00, 0x00];

pub fn make_vitals_service_uuid() -> Uuid {
    Uuid::parse_str(VITALS_SERVICE).unwrap()
}

pub fn make_vitals_data_uuid() -> Uuid {
    Uuid::parse_str(VITALS_DATA_CHARACTERISTIC).unwrap()
}

pub fn make_client_configuration_uuid() -> Uuid {
    Uuid::parse_str(CLIENT_CONFIGURATION_DESCRIPTOR).unwrap()
}
