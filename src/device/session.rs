use log::{debug, info, warn};
use uuid::Uuid;

use crate::device::constants::{
    make_client_configuration_uuid, make_vitals_data_uuid, make_vitals_service_uuid,
    NOTIFICATIONS_ENABLE,
};
use crate::device::types::{Command, FailureReason, SessionEvent, SessionState};

/**
 * The context of one connection attempt: the current phase, the device-name
 * filter, the target GATT identifiers and whether the vitals service has been
 * seen during discovery. Owned by the driver; all events pass through
 * handle_event on the driver's task.
 *
 * The session performs no I/O itself. Every transition returns the commands
 * the driver has to execute, which keeps the whole lifecycle testable against
 * canned events.
 */
#[derive(Debug)]
pub struct Session {
    name_filter: String,
    service_uuid: Uuid,
    characteristic_uuid: Uuid,
    descriptor_uuid: Uuid,
    state: SessionState,
    found_service: bool,
}

impl Session {
    pub fn new(name_filter: &str) -> Session {
        Session {
            name_filter: name_filter.to_string(),
            service_uuid: make_vitals_service_uuid(),
            characteristic_uuid: make_vitals_data_uuid(),
            descriptor_uuid: make_client_configuration_uuid(),
            state: SessionState::Scanning,
            found_service: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn failure(&self) -> Option<FailureReason> {
        match self.state {
            SessionState::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn handle_event(&mut self, event: SessionEvent) -> Vec<Command> {
        match event {
            SessionEvent::DeviceDiscovered { name } => {
                debug!("Discovered device {:?}", name);

                // Connect to the first match only; later discoveries of the
                // same name must not issue a second connect.
                if self.state == SessionState::Scanning && name.contains(&self.name_filter) {
                    info!("Matched device {:?}; connecting...", name);
                    self.state = SessionState::Connecting;
                    return vec![Command::Connect];
                }

                Vec::new()
            },
            SessionEvent::ScanError { message } => {
                warn!("Scan error: {}", message);
                Vec::new()
            },
            SessionEvent::ScanFinished => {
                info!("Scan finished");

                if self.state == SessionState::Scanning {
                    warn!("Scan finished without finding a matching device");
                    self.state = SessionState::Failed(FailureReason::NoMatchingDevice);
                }

                Vec::new()
            },
            SessionEvent::Connected => {
                if self.state != SessionState::Connecting {
                    return Vec::new();
                }

                info!("Connected; discovering services...");
                self.state = SessionState::DiscoveringServices;
                vec![Command::DiscoverServices]
            },
            SessionEvent::Disconnected => {
                warn!("Peripheral disconnected");
                self.state = SessionState::Failed(FailureReason::Disconnected);
                Vec::new()
            },
            SessionEvent::ConnectionError { message } => {
                warn!("Connection error: {}", message);
                Vec::new()
            },
            SessionEvent::ServiceDiscovered { uuid } => {
                debug!("Discovered service {}", uuid);

                if self.state == SessionState::DiscoveringServices && uuid == self.service_uuid {
                    info!("Found vitals service {}", uuid);
                    self.found_service = true;
                }

                Vec::new()
            },
            SessionEvent::DiscoveryFinished => {
                if self.state != SessionState::DiscoveringServices {
                    return Vec::new();
                }

                info!("Service discovery finished");

                if !self.found_service {
                    warn!("The vitals service is not present on this device");
                    self.state = SessionState::Failed(FailureReason::ServiceMissing);
                    return Vec::new();
                }

                self.state = SessionState::DiscoveringDetails;
                vec![Command::DiscoverDetails]
            },
            SessionEvent::DetailsDiscovered { characteristics } => {
                if self.state != SessionState::DiscoveringDetails {
                    return Vec::new();
                }

                let characteristic = characteristics
                    .iter()
                    .find(|characteristic| characteristic.uuid == self.characteristic_uuid);

                let Some(characteristic) = characteristic else {
                    warn!("The vitals data characteristic is not present");
                    self.state = SessionState::Failed(FailureReason::CharacteristicMissing);
                    return Vec::new();
                };

                if !characteristic.descriptors.contains(&self.descriptor_uuid) {
                    warn!("The data characteristic has no client configuration descriptor");
                    self.state = SessionState::Failed(FailureReason::DescriptorMissing);
                    return Vec::new();
                }

                info!("Enabling notifications on {}", self.characteristic_uuid);
                self.state = SessionState::SubscribingNotifications;
                vec![Command::WriteDescriptor {
                    characteristic: self.characteristic_uuid,
                    descriptor: self.descriptor_uuid,
                    value: NOTIFICATIONS_ENABLE,
                }]
            },
            SessionEvent::ServiceError { message } => {
                warn!("Service error: {}", message);
                Vec::new()
            },
            SessionEvent::DescriptorWritten { value } => {
                if value == NOTIFICATIONS_ENABLE && self.state == SessionState::SubscribingNotifications {
                    info!("Notifications enabled; streaming measurements");
                    self.state = SessionState::Streaming;
                }

                Vec::new()
            },
            SessionEvent::CharacteristicChanged { uuid, value } => {
                if uuid != self.characteristic_uuid {
                    debug!("Ignoring notification for characteristic {}", uuid);
                    return Vec::new();
                }

                vec![Command::ReportPayload { value }]
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::constants::DEVICE_NAME_FILTER;
    use crate::device::types::GattCharacteristic;

    fn discovered(name: &str) -> SessionEvent {
        SessionEvent::DeviceDiscovered { name: name.to_string() }
    }

    fn advertised(uuid: Uuid) -> SessionEvent {
        SessionEvent::ServiceDiscovered { uuid }
    }

    fn notified(uuid: Uuid, value: &[u8]) -> SessionEvent {
        SessionEvent::CharacteristicChanged { uuid, value: value.to_vec() }
    }

    fn vitals_inventory() -> Vec<GattCharacteristic> {
        vec![GattCharacteristic {
            uuid: make_vitals_data_uuid(),
            descriptors: vec![make_client_configuration_uuid()],
        }]
    }

    fn other_uuid() -> Uuid {
        Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb)
    }

    fn session() -> Session {
        Session::new(DEVICE_NAME_FILTER)
    }

    // Scanning -> Connecting -> DiscoveringServices, ready for discovery events.
    fn discovering_session() -> Session {
        let mut session = session();
        session.handle_event(discovered("BerryMed_Pulse_Oximeter_01"));
        session.handle_event(SessionEvent::Connected);
        session
    }

    fn streaming_session() -> Session {
        let mut session = discovering_session();
        session.handle_event(advertised(make_vitals_service_uuid()));
        session.handle_event(SessionEvent::DiscoveryFinished);
        session.handle_event(SessionEvent::DetailsDiscovered { characteristics: vitals_inventory() });
        session.handle_event(SessionEvent::DescriptorWritten { value: NOTIFICATIONS_ENABLE.to_vec() });
        assert_eq!(session.state(), SessionState::Streaming);
        session
    }

    #[test]
    fn matching_device_connects_exactly_once() {
        let mut session = session();

        let commands = session.handle_event(discovered("BerryMed_Pulse_Oximeter_01"));
        assert_eq!(commands, vec![Command::Connect]);
        assert_eq!(session.state(), SessionState::Connecting);

        // A second match while already connecting must not connect again.
        let commands = session.handle_event(discovered("BerryMed_Pulse_Oximeter_01"));
        assert!(commands.is_empty());
    }

    #[test]
    fn non_matching_device_is_ignored() {
        let mut session = session();

        let commands = session.handle_event(discovered("OtherDevice"));
        assert!(commands.is_empty());
        assert_eq!(session.state(), SessionState::Scanning);
    }

    #[test]
    fn name_match_is_case_sensitive() {
        let mut session = session();

        let commands = session.handle_event(discovered("berrymed_pulse_oximeter"));
        assert!(commands.is_empty());
        assert_eq!(session.state(), SessionState::Scanning);
    }

    #[test]
    fn scan_finished_without_match_fails_the_session() {
        let mut session = session();
        session.handle_event(discovered("OtherDevice"));
        session.handle_event(SessionEvent::ScanFinished);

        assert_eq!(session.failure(), Some(FailureReason::NoMatchingDevice));
    }

    #[test]
    fn scan_finished_after_match_is_informational() {
        let mut session = session();
        session.handle_event(discovered("BerryMed_Pulse_Oximeter_01"));
        session.handle_event(SessionEvent::ScanFinished);

        assert_eq!(session.state(), SessionState::Connecting);
    }

    #[test]
    fn scan_error_does_not_change_state() {
        let mut session = session();

        let commands = session.handle_event(SessionEvent::ScanError {
            message: "adapter powered off".to_string(),
        });
        assert!(commands.is_empty());
        assert_eq!(session.state(), SessionState::Scanning);
    }

    #[test]
    fn connecting_triggers_service_discovery() {
        let mut session = session();
        session.handle_event(discovered("BerryMed_Pulse_Oximeter_01"));

        let commands = session.handle_event(SessionEvent::Connected);
        assert_eq!(commands, vec![Command::DiscoverServices]);
        assert_eq!(session.state(), SessionState::DiscoveringServices);
    }

    #[test]
    fn connection_error_is_observed_without_retry() {
        let mut session = session();
        session.handle_event(discovered("BerryMed_Pulse_Oximeter_01"));

        let commands = session.handle_event(SessionEvent::ConnectionError {
            message: "connection refused".to_string(),
        });
        assert!(commands.is_empty());
        assert_eq!(session.state(), SessionState::Connecting);
    }

    #[test]
    fn service_flag_requires_the_target_uuid() {
        let mut session = discovering_session();
        session.handle_event(advertised(other_uuid()));

        session.handle_event(SessionEvent::DiscoveryFinished);
        assert_eq!(session.failure(), Some(FailureReason::ServiceMissing));
    }

    #[test]
    fn target_service_seen_before_discovery_finished_proceeds_to_details() {
        let mut session = discovering_session();
        session.handle_event(advertised(other_uuid()));
        session.handle_event(advertised(make_vitals_service_uuid()));

        let commands = session.handle_event(SessionEvent::DiscoveryFinished);
        assert_eq!(commands, vec![Command::DiscoverDetails]);
        assert_eq!(session.state(), SessionState::DiscoveringDetails);
    }

    #[test]
    fn target_service_seen_after_discovery_finished_does_not_count() {
        let mut session = discovering_session();
        session.handle_event(SessionEvent::DiscoveryFinished);

        let commands = session.handle_event(advertised(make_vitals_service_uuid()));
        assert!(commands.is_empty());
        assert_eq!(session.failure(), Some(FailureReason::ServiceMissing));
    }

    #[test]
    fn enables_notifications_for_the_oximeter_scenario() {
        let mut session = session();

        assert_eq!(
            session.handle_event(discovered("BerryMed_Pulse_Oximeter_01")),
            vec![Command::Connect],
        );
        assert_eq!(
            session.handle_event(SessionEvent::Connected),
            vec![Command::DiscoverServices],
        );
        session.handle_event(advertised(make_vitals_service_uuid()));
        assert_eq!(
            session.handle_event(SessionEvent::DiscoveryFinished),
            vec![Command::DiscoverDetails],
        );

        let commands = session.handle_event(SessionEvent::DetailsDiscovered {
            characteristics: vitals_inventory(),
        });
        assert_eq!(commands, vec![Command::WriteDescriptor {
            characteristic: make_vitals_data_uuid(),
            descriptor: make_client_configuration_uuid(),
            value: [0x01, 0x00],
        }]);
        assert_eq!(session.state(), SessionState::SubscribingNotifications);
    }

    #[test]
    fn missing_characteristic_fails_without_a_write() {
        let mut session = discovering_session();
        session.handle_event(advertised(make_vitals_service_uuid()));
        session.handle_event(SessionEvent::DiscoveryFinished);

        let commands = session.handle_event(SessionEvent::DetailsDiscovered {
            characteristics: vec![GattCharacteristic {
                uuid: other_uuid(),
                descriptors: vec![make_client_configuration_uuid()],
            }],
        });
        assert!(commands.is_empty());
        assert_eq!(session.failure(), Some(FailureReason::CharacteristicMissing));
    }

    #[test]
    fn missing_descriptor_fails_without_a_write() {
        let mut session = discovering_session();
        session.handle_event(advertised(make_vitals_service_uuid()));
        session.handle_event(SessionEvent::DiscoveryFinished);

        let commands = session.handle_event(SessionEvent::DetailsDiscovered {
            characteristics: vec![GattCharacteristic {
                uuid: make_vitals_data_uuid(),
                descriptors: Vec::new(),
            }],
        });
        assert!(commands.is_empty());
        assert_eq!(session.failure(), Some(FailureReason::DescriptorMissing));
    }

    #[test]
    fn enable_confirmation_starts_streaming() {
        let mut session = discovering_session();
        session.handle_event(advertised(make_vitals_service_uuid()));
        session.handle_event(SessionEvent::DiscoveryFinished);
        session.handle_event(SessionEvent::DetailsDiscovered { characteristics: vitals_inventory() });

        session.handle_event(SessionEvent::DescriptorWritten {
            value: NOTIFICATIONS_ENABLE.to_vec(),
        });
        assert_eq!(session.state(), SessionState::Streaming);
    }

    #[test]
    fn other_written_values_do_not_start_streaming() {
        let mut session = discovering_session();
        session.handle_event(advertised(make_vitals_service_uuid()));
        session.handle_event(SessionEvent::DiscoveryFinished);
        session.handle_event(SessionEvent::DetailsDiscovered { characteristics: vitals_inventory() });

        session.handle_event(SessionEvent::DescriptorWritten { value: vec![0x00, 0x00] });
        assert_eq!(session.state(), SessionState::SubscribingNotifications);
    }

    #[test]
    fn reports_each_notification_in_arrival_order() {
        let mut session = streaming_session();
        let payload = [0xaa, 0x55, 0x0f, 0x08, 0x01, 0x62, 0x48];

        // Identical payloads are not deduplicated; one report per event.
        for _ in 0..3 {
            let commands = session.handle_event(notified(make_vitals_data_uuid(), &payload));
            assert_eq!(commands, vec![Command::ReportPayload { value: payload.to_vec() }]);
        }
    }

    #[test]
    fn notifications_for_other_characteristics_are_ignored() {
        let mut session = streaming_session();

        let commands = session.handle_event(notified(other_uuid(), &[0x01]));
        assert!(commands.is_empty());
    }

    #[test]
    fn disconnect_is_terminal() {
        let mut session = streaming_session();
        session.handle_event(SessionEvent::Disconnected);

        assert_eq!(session.failure(), Some(FailureReason::Disconnected));
    }
}
