//! grab / release: lending a transport's wire to sensor code.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use fieldcal_comms::app::ports::SensorClient;
use fieldcal_comms::comms::medium::{SharedMedium, with_medium};
use fieldcal_comms::comms::ownership::OwnershipState;
use fieldcal_comms::fsm::{Mode, TransportKind};

use crate::rig::{Rig, fast_config};

#[derive(Default)]
struct Sensor {
    medium: Mutex<Option<SharedMedium>>,
    detaches: AtomicU32,
}

impl SensorClient for Sensor {
    fn attach(&self, medium: SharedMedium) {
        *self.medium.lock().unwrap() = Some(medium);
    }

    fn detach(&self) {
        self.medium.lock().unwrap().take();
        self.detaches.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn grabbed_link_is_left_alone_until_release() {
    let rig = Rig::start(TransportKind::Usb);
    let sensor = Sensor::default();

    assert!(rig.task.grab(&sensor));
    assert_eq!(rig.task.link().ownership.state(), OwnershipState::Relinquished);

    rig.wire.push_line("#KM?\n");
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(rig.wire.inbound_len(), 1, "run loop must not read a lent link");
    assert!(rig.wire.sent().is_empty());

    let medium = sensor.medium.lock().unwrap().clone().unwrap();
    let line = with_medium(&medium, |m| m.receive_string(50)).unwrap();
    assert_eq!(line.as_str(), "#KM?\n");

    rig.task.release(&sensor);
    assert_eq!(sensor.detaches.load(Ordering::SeqCst), 1);
    assert_eq!(rig.task.link().ownership.state(), OwnershipState::Owned);
    assert_eq!(rig.exchange("#KM?\n"), "!KM=L\n");
}

#[test]
fn second_grab_is_refused() {
    let rig = Rig::start(TransportKind::Bluetooth);
    let a = Sensor::default();
    let b = Sensor::default();
    assert!(rig.task.grab(&a));
    assert!(!rig.task.grab(&b));
    assert!(b.medium.lock().unwrap().is_none());
    rig.task.release(&a);
    assert!(rig.task.grab(&b));
    rig.task.release(&b);
}

#[test]
fn grab_times_out_when_run_loop_is_stuck() {
    let mut config = fast_config();
    config.suspend_timeout_ms = 50;
    let rig = Rig::start_with(
        TransportKind::Usb,
        config,
        std::sync::Arc::new(fieldcal_comms::fsm::remote::RemoteState::new().unwrap()),
    );
    let sensor = Sensor::default();

    // Hold the medium so the run loop blocks short of its next checkpoint.
    let medium = rig.task.link().medium.clone();
    with_medium(&medium, |_| {
        std::thread::sleep(Duration::from_millis(50));
        assert!(!rig.task.grab(&sensor));
    });
    assert_eq!(rig.task.link().ownership.state(), OwnershipState::Owned);
    assert!(sensor.medium.lock().unwrap().is_none());
    assert_eq!(rig.exchange("#KM?\n"), "!KM=L\n");
}

#[test]
fn external_mode_lends_owi_link() {
    let rig = Rig::start(TransportKind::Owi);
    assert!(rig.wait_for_mode(Mode::External));
    let sensor = Sensor::default();
    assert!(rig.task.grab(&sensor));
    rig.task.release(&sensor);
    assert!(rig.task.request_mode(Mode::Local));
    assert!(rig.wait_for_mode(Mode::Local));
}
