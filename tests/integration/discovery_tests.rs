//! Device discovery on the serial link, against a scripted far-end device.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use fieldcal_comms::comms::device_info::{ExternalDeviceInfo, Version};
use fieldcal_comms::comms::fake::ScriptedMedium;
use fieldcal_comms::events::EventMask;
use fieldcal_comms::fsm::{Mode, TransportKind};

use crate::rig::{Rig, wait_until};

/// Answers `#RI?` / `#SN?` queries the way an attached sensor would.
struct FarEnd {
    stop: Arc<AtomicBool>,
    serial: Arc<AtomicU32>,
    handle: Option<JoinHandle<()>>,
}

impl FarEnd {
    fn spawn(wire: ScriptedMedium, kind: u16, serial: u32) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let serial = Arc::new(AtomicU32::new(serial));
        let handle = {
            let stop = stop.clone();
            let serial = serial.clone();
            // Taken before the thread starts so a query sent in between is answered.
            let mut seen = wire.sent().len();
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    if !wire.wait_for_sent(seen + 1, Duration::from_millis(10)) {
                        continue;
                    }
                    let lines = wire.sent_lines();
                    for line in &lines[seen..] {
                        match line.as_str() {
                            "#RI?\n" => wire.push_line(&format!("!RI=DK{kind:04},V02.01.07\n")),
                            "#SN?\n" => {
                                wire.push_line(&format!("!SN={}\n", serial.load(Ordering::SeqCst)));
                            }
                            _ => {}
                        }
                    }
                    seen = lines.len();
                }
            })
        };
        Self {
            stop,
            serial,
            handle: Some(handle),
        }
    }

    fn unplug(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            h.join().unwrap();
        }
    }
}

impl Drop for FarEnd {
    fn drop(&mut self) {
        self.unplug();
    }
}

fn wait_for_info(rig: &Rig, pred: impl Fn(&ExternalDeviceInfo) -> bool) -> bool {
    wait_until(|| pred(&rig.task.connected_device_info()))
}

#[test]
fn supported_device_is_identified() {
    let rig = Rig::start(TransportKind::Serial);
    let _far = FarEnd::spawn(rig.wire.clone(), 499, 4242);

    assert!(rig.task.request_mode(Mode::DeviceDiscovery));
    let hit = rig
        .task
        .wait_for_event(EventMask::DEVICE_INFO_CHANGED, Duration::from_secs(3));
    assert_eq!(hit, EventMask::DEVICE_INFO_CHANGED);

    let info = rig.task.connected_device_info();
    assert!(info.connected && info.supported && info.identified);
    assert_eq!(info.serial_number, 4242);
    assert_eq!(info.identity.kind, 499);
    assert_eq!(info.identity.version, Version::new(2, 1, 7));
    assert_eq!(rig.task.current_mode(), Mode::DeviceDiscovery);
}

#[test]
fn unsupported_device_is_connected_but_not_identified() {
    let rig = Rig::start(TransportKind::Serial);
    let _far = FarEnd::spawn(rig.wire.clone(), 123, 1);
    assert!(rig.task.request_mode(Mode::DeviceDiscovery));
    assert!(wait_for_info(&rig, |i| i.connected));
    let info = rig.task.connected_device_info();
    assert!(!info.supported);
    assert!(!info.identified);
}

#[test]
fn swapped_device_returns_to_local() {
    let rig = Rig::start(TransportKind::Serial);
    let far = FarEnd::spawn(rig.wire.clone(), 478, 100);
    assert!(rig.task.request_mode(Mode::DeviceDiscovery));
    assert!(wait_for_info(&rig, |i| i.identified && i.serial_number == 100));

    far.serial.store(200, Ordering::SeqCst);
    assert!(rig.wait_for_mode(Mode::Local));
    assert_eq!(rig.task.connected_device_info(), ExternalDeviceInfo::default());
}

#[test]
fn unplugged_device_returns_to_local() {
    let rig = Rig::start(TransportKind::Serial);
    let mut far = FarEnd::spawn(rig.wire.clone(), 472, 7);
    assert!(rig.task.request_mode(Mode::DeviceDiscovery));
    assert!(wait_for_info(&rig, |i| i.identified));

    far.unplug();
    assert!(rig.wait_for_mode(Mode::Local));
    assert!(!rig.task.connected_device_info().connected);
}
