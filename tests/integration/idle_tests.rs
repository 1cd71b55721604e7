//! Idle supervision: auto power-off and the serial discovery handover.

use std::sync::Arc;
use std::time::Duration;

use fieldcal_comms::comms::device_info::ExternalDeviceInfo;
use fieldcal_comms::events::EventMask;
use fieldcal_comms::fsm::remote::RemoteState;
use fieldcal_comms::fsm::{Mode, TransportKind};

use crate::rig::{Rig, fast_config, wait_until};

#[test]
fn silence_requests_shutdown_exactly_once() {
    let mut config = fast_config();
    config.auto_power_off_secs = 1;
    let rig = Rig::start_with(TransportKind::Usb, config, Arc::new(RemoteState::new().unwrap()));

    let hit = rig
        .task
        .wait_for_event(EventMask::IDLE_SHUTDOWN, Duration::from_secs(3));
    assert_eq!(hit, EventMask::IDLE_SHUTDOWN);
    assert_eq!(rig.instrument.shutdown_count(), 1);

    std::thread::sleep(Duration::from_millis(1500));
    assert_eq!(rig.instrument.shutdown_count(), 1, "fires once per idle period");

    // Traffic starts a new idle period.
    assert_eq!(rig.exchange("#KM?\n"), "!KM=L\n");
    assert!(wait_until(|| rig.instrument.shutdown_count() == 2));
}

#[test]
fn traffic_keeps_the_instrument_awake() {
    let mut config = fast_config();
    config.auto_power_off_secs = 1;
    let rig = Rig::start_with(TransportKind::Bluetooth, config, Arc::new(RemoteState::new().unwrap()));
    for _ in 0..12 {
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(rig.exchange("#KM?\n"), "!KM=L\n");
    }
    assert_eq!(rig.instrument.shutdown_count(), 0);
}

#[test]
fn quiet_serial_link_probes_for_a_device() {
    let mut config = fast_config();
    config.discovery_idle_limit = 3;
    let rig = Rig::start_with(TransportKind::Serial, config, Arc::new(RemoteState::new().unwrap()));

    // Nobody answers: discovery gives up and Local takes over again.
    assert!(wait_until(|| rig.wire.sent_lines().iter().any(|l| l == "#RI?\n")));
    assert!(rig.wait_for_mode(Mode::Local));
    assert_eq!(rig.task.connected_device_info(), ExternalDeviceInfo::default());
}

#[test]
fn serial_discovery_cycles_still_power_off() {
    let mut config = fast_config();
    config.auto_power_off_secs = 1;
    config.discovery_idle_limit = 4;
    let rig = Rig::start_with(TransportKind::Serial, config, Arc::new(RemoteState::new().unwrap()));

    // Local and discovery keep swapping; the idle period spans both.
    let hit = rig
        .task
        .wait_for_event(EventMask::IDLE_SHUTDOWN, Duration::from_secs(5));
    assert_eq!(hit, EventMask::IDLE_SHUTDOWN);
    assert!(rig.wire.sent_lines().iter().any(|l| l == "#RI?\n"));
    assert_eq!(rig.instrument.shutdown_count(), 1);
}

#[test]
fn unplugged_link_does_not_count_as_idle() {
    let mut config = fast_config();
    config.auto_power_off_secs = 1;
    let rig = Rig::start_with(TransportKind::Usb, config, Arc::new(RemoteState::new().unwrap()));
    rig.wire.set_connected(false);

    std::thread::sleep(Duration::from_millis(1500));
    assert_eq!(rig.instrument.shutdown_count(), 0);
    assert!(rig.task.link().idle_count() < 10);

    rig.wire.set_connected(true);
    assert!(wait_until(|| rig.instrument.shutdown_count() == 1));
}
