use std::collections::VecDeque;
use std::pin::Pin;

use btleplug::api::{Central, CentralEvent, Descriptor, Manager as _, Peripheral as _, ScanFilter, ValueNotification};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::{Stream, StreamExt};
use log::{debug, info, warn};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::device::constants::{make_client_configuration_uuid, make_vitals_data_uuid, make_vitals_service_uuid, NOTIFICATIONS_DISABLE, WRITE_DEADLINE};
use crate::device::session::Session;
use crate::device::types::{Command, GattCharacteristic, SessionEvent, SessionOptions, SessionState};
use crate::error::DeviceError;

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

enum Wake {
    Cancelled,
    ScanWindowElapsed,
    Central(CentralEvent),
    CentralClosed,
    Notification(ValueNotification),
}

/**
 * Drives one session against the platform BLE stack: starts a bounded scan,
 * feeds adapter events and notifications into the session, and executes the
 * commands it returns. Resolves when the session is cancelled or can no
 * longer make progress.
 */
pub async fn run_session(cancel: CancellationToken, options: &SessionOptions) -> Result<(), DeviceError> {
    let manager = Manager::new().await.map_err(|source| DeviceError::Scan { source })?;
    let adapters = manager.adapters().await.map_err(|source| DeviceError::Scan { source })?;
    let adapter = adapters.into_iter().next().ok_or(DeviceError::NoAdapter)?;

    info!("Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));

    let mut session = Session::new(&options.name_filter);
    let mut central_events = adapter.events().await.map_err(|source| DeviceError::Scan { source })?;

    // Matching by name happens in the session, so the platform filter stays empty.
    adapter.start_scan(ScanFilter::default()).await.map_err(|source| DeviceError::Scan { source })?;

    let mut peripheral: Option<Peripheral> = None;
    let mut notifications: Option<NotificationStream> = None;

    let scan_deadline = sleep(options.scan_timeout);
    tokio::pin!(scan_deadline);
    let mut scan_open = true;

    loop {
        if let Some(reason) = session.failure() {
            if scan_open {
                stop_scan(&adapter).await;
            }
            return Err(DeviceError::Stalled { reason });
        }

        let wake = tokio::select! {
            _ = cancel.cancelled() => Wake::Cancelled,
            _ = &mut scan_deadline, if scan_open => Wake::ScanWindowElapsed,
            event = central_events.next() => match event {
                Some(event) => Wake::Central(event),
                None => Wake::CentralClosed,
            },
            Some(notification) = next_notification(&mut notifications) => Wake::Notification(notification),
        };

        match wake {
            Wake::Cancelled => {
                if scan_open {
                    stop_scan(&adapter).await;
                }
                shutdown_session(&session, &peripheral).await;
                return Ok(());
            },
            Wake::ScanWindowElapsed => {
                scan_open = false;
                stop_scan(&adapter).await;
                handle_session_event(SessionEvent::ScanFinished, &mut session, &peripheral, &mut notifications).await?;
            },
            Wake::Central(event) => {
                handle_central_event(event, &mut session, &adapter, &mut peripheral, &mut notifications).await?;
            },
            Wake::CentralClosed => {
                return Err(DeviceError::EventStreamClosed);
            },
            Wake::Notification(notification) => {
                let event = SessionEvent::CharacteristicChanged {
                    uuid: notification.uuid,
                    value: notification.value,
                };
                handle_session_event(event, &mut session, &peripheral, &mut notifications).await?;
            },
        }
    }
}

async fn next_notification(stream: &mut Option<NotificationStream>) -> Option<ValueNotification> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn stop_scan(adapter: &Adapter) {
    if let Err(err) = adapter.stop_scan().await {
        warn!("Failed to stop scanning: {:?}", err);
    }
}

async fn handle_central_event(
    event: CentralEvent,
    session: &mut Session,
    adapter: &Adapter,
    peripheral: &mut Option<Peripheral>,
    notifications: &mut Option<NotificationStream>,
) -> Result<(), DeviceError> {
    match event {
        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
            // Candidates only matter while scanning; a later advertisement
            // must not replace the peripheral the session connected to.
            if session.state() != SessionState::Scanning {
                return Ok(());
            }

            match device_name(adapter, &id).await {
                Ok(Some((candidate, name))) => {
                    *peripheral = Some(candidate);
                    handle_session_event(
                        SessionEvent::DeviceDiscovered { name },
                        session, peripheral, notifications,
                    ).await?;
                },
                Ok(None) => {
                    debug!("Peripheral {:?} has no name; skipping", id);
                },
                Err(err) => {
                    handle_session_event(
                        SessionEvent::ScanError { message: err.to_string() },
                        session, peripheral, notifications,
                    ).await?;
                },
            }
        },
        CentralEvent::DeviceDisconnected(id) => {
            let ours = peripheral.as_ref().map(|peripheral| peripheral.id() == id).unwrap_or(false);
            if ours {
                handle_session_event(SessionEvent::Disconnected, session, peripheral, notifications).await?;
            }
        },
        _ => {},
    }

    Ok(())
}

async fn device_name(adapter: &Adapter, id: &PeripheralId) -> Result<Option<(Peripheral, String)>, btleplug::Error> {
    let peripheral = adapter.peripheral(id).await?;
    let properties = peripheral.properties().await?;
    let name = properties.and_then(|properties| properties.local_name);
    Ok(name.map(|name| (peripheral, name)))
}

/**
 * Runs an event through the session and executes the resulting commands.
 * Executing a command may synthesize follow-up events (a finished discovery,
 * a confirmed descriptor write), which are fed back in until the queue drains.
 */
async fn handle_session_event(
    event: SessionEvent,
    session: &mut Session,
    peripheral: &Option<Peripheral>,
    notifications: &mut Option<NotificationStream>,
) -> Result<(), DeviceError> {
    let mut queue = VecDeque::new();
    queue.push_back(event);

    while let Some(event) = queue.pop_front() {
        for command in session.handle_event(event) {
            let follow_ups = execute_command(command, peripheral, notifications).await?;
            queue.extend(follow_ups);
        }
    }

    Ok(())
}

async fn execute_command(
    command: Command,
    peripheral: &Option<Peripheral>,
    notifications: &mut Option<NotificationStream>,
) -> Result<Vec<SessionEvent>, DeviceError> {
    let Some(peripheral) = peripheral.as_ref() else {
        warn!("No peripheral selected; dropping command {:?}", command);
        return Ok(Vec::new());
    };

    match command {
        Command::Connect => {
            info!("Connecting to peripheral...");
            match peripheral.connect().await {
                Ok(()) => {
                    let stream = peripheral.notifications().await
                        .map_err(|source| DeviceError::Connection { source })?;
                    *notifications = Some(stream);
                    Ok(vec![SessionEvent::Connected])
                },
                Err(err) => Ok(vec![SessionEvent::ConnectionError { message: err.to_string() }]),
            }
        },
        Command::DiscoverServices => {
            match peripheral.discover_services().await {
                Ok(()) => {
                    let mut events: Vec<SessionEvent> = peripheral.services().iter()
                        .map(|service| SessionEvent::ServiceDiscovered { uuid: service.uuid })
                        .collect();
                    events.push(SessionEvent::DiscoveryFinished);
                    Ok(events)
                },
                Err(err) => Ok(vec![SessionEvent::ConnectionError { message: err.to_string() }]),
            }
        },
        Command::DiscoverDetails => {
            // discover_services already walked characteristics and
            // descriptors; report the inventory of the vitals service.
            let services = peripheral.services();
            let service_uuid = make_vitals_service_uuid();

            let characteristics = services.iter()
                .filter(|service| service.uuid == service_uuid)
                .flat_map(|service| service.characteristics.iter())
                .map(|characteristic| GattCharacteristic {
                    uuid: characteristic.uuid,
                    descriptors: characteristic.descriptors.iter().map(|descriptor| descriptor.uuid).collect(),
                })
                .collect();

            Ok(vec![SessionEvent::DetailsDiscovered { characteristics }])
        },
        Command::WriteDescriptor { characteristic, descriptor, value } => {
            let Some(descriptor) = find_descriptor(peripheral, characteristic, descriptor) else {
                warn!("Descriptor {} is no longer present on characteristic {}", descriptor, characteristic);
                return Ok(Vec::new());
            };

            let fut = peripheral.write_descriptor(&descriptor, &value);

            tokio::select! {
                _ = sleep(Duration::from_millis(WRITE_DEADLINE)) => {
                    warn!("Writing the configuration descriptor took too long");
                    Ok(Vec::new())
                }
                result = fut => match result {
                    Ok(()) => Ok(vec![SessionEvent::DescriptorWritten { value: value.to_vec() }]),
                    Err(err) => Ok(vec![SessionEvent::ServiceError { message: err.to_string() }]),
                }
            }
        },
        Command::ReportPayload { value } => {
            println!("{}", format_payload(&value));
            Ok(Vec::new())
        },
    }
}

fn find_descriptor(peripheral: &Peripheral, characteristic_uuid: Uuid, descriptor_uuid: Uuid) -> Option<Descriptor> {
    peripheral.services().into_iter()
        .flat_map(|service| service.characteristics.into_iter())
        .filter(|characteristic| characteristic.uuid == characteristic_uuid)
        .flat_map(|characteristic| characteristic.descriptors.into_iter())
        .find(|descriptor| descriptor.uuid == descriptor_uuid)
}

fn format_payload(value: &[u8]) -> String {
    value.iter()
        .map(|byte| format!("{:02x}", byte))
        .collect::<Vec<_>>()
        .join(" ")
}

/**
 * Best-effort teardown on cancellation: turn notifications back off if they
 * were enabled, then disconnect. Failures are logged only.
 */
async fn shutdown_session(session: &Session, peripheral: &Option<Peripheral>) {
    let Some(peripheral) = peripheral.as_ref() else {
        return;
    };

    match session.state() {
        SessionState::Scanning | SessionState::Failed(_) => return,
        SessionState::Streaming => disable_notifications(peripheral).await,
        _ => {},
    }

    if let Err(err) = peripheral.disconnect().await {
        warn!("Failed to disconnect from peripheral: {:?}", err);
    }
}

async fn disable_notifications(peripheral: &Peripheral) {
    let Some(descriptor) = find_descriptor(peripheral, make_vitals_data_uuid(), make_client_configuration_uuid()) else {
        return;
    };

    let fut = peripheral.write_descriptor(&descriptor, &NOTIFICATIONS_DISABLE);

    tokio::select! {
        _ = sleep(Duration::from_millis(WRITE_DEADLINE)) => {
            warn!("Writing the configuration descriptor took too long");
        }
        result = fut => {
            if let Err(err) = result {
                warn!("Failed to disable notifications: {:?}", err);
            }
        }
    };
}
