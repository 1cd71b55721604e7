//! DUCI slave sessions driven end to end: line in on the scripted wire,
//! command table dispatch, reply out.

use std::time::Duration;

use fieldcal_comms::fsm::{Mode, TransportKind};
use fieldcal_comms::protocol::ErrorFlags;
use fieldcal_comms::protocol::PinMode;
use fieldcal_comms::protocol::duci::checksum;

use crate::rig::{Rig, fast_config, wait_until};

fn re(flags: ErrorFlags) -> String {
    format!("!RE={:08X}\n", flags.bits())
}

// ── Spec scenarios ────────────────────────────────────────────

#[test]
fn km_local_in_local_stays_put_without_errors() {
    let rig = Rig::start(TransportKind::Usb);
    assert_eq!(rig.command("#KM=L\n"), re(ErrorFlags::NONE));
    assert_eq!(rig.task.current_mode(), Mode::Local);
    assert_eq!(rig.exchange("#KM?\n"), "!KM=L\n");
}

#[test]
fn km_remote_on_usb_enters_remote() {
    let rig = Rig::start(TransportKind::Usb);
    rig.wire.push_line("#KM=R\n");
    assert!(rig.wait_for_mode(Mode::Remote));
    assert_eq!(rig.exchange("#KM?\n"), "!KM=R\n");
}

// ── Base commands ─────────────────────────────────────────────

#[test]
fn identity_query() {
    let rig = Rig::start(TransportKind::Usb);
    assert_eq!(rig.exchange("#RI?\n"), "!RI=DK0499,V01.02.03\n");
    assert_eq!(rig.exchange("*RI?\n"), "!RI=DK0499,V01.02.03\n");
}

#[test]
fn repeated_queries_are_independent() {
    let rig = Rig::start(TransportKind::Bluetooth);
    assert_eq!(rig.exchange("#SN?\n"), "!SN=12345\n");
    assert_eq!(rig.exchange("#SN?\n"), "!SN=12345\n");
    assert_eq!(rig.exchange("#RE?\n"), re(ErrorFlags::NONE));
}

#[test]
fn serial_number_needs_factory_pin() {
    let rig = Rig::start(TransportKind::Usb);
    assert_eq!(rig.command("#SN=777\n"), re(ErrorFlags::INVALID_MODE));
    assert_eq!(rig.exchange("#SN?\n"), "!SN=12345\n");

    assert_eq!(rig.command("#PP=800\n"), re(ErrorFlags::NONE));
    assert_eq!(*rig.instrument.pin.lock().unwrap(), PinMode::Factory);
    assert_eq!(rig.exchange("#PP?\n"), format!("!PP={}\n", PinMode::Factory.level()));
    assert_eq!(rig.command("#SN=777\n"), re(ErrorFlags::NONE));
    assert_eq!(rig.exchange("#SN?\n"), "!SN=777\n");
}

#[test]
fn fixed_width_pin_rejects_other_digit_counts() {
    let rig = Rig::start(TransportKind::Usb);
    assert_eq!(rig.command("#PP=80\n"), re(ErrorFlags::INVALID_ARGS));
    assert_eq!(rig.command("#PP=0800\n"), re(ErrorFlags::INVALID_ARGS));
    assert_eq!(*rig.instrument.pin.lock().unwrap(), PinMode::None);
    assert_eq!(rig.command("#PP=999\n"), re(ErrorFlags::INVALID_ARGS));
}

#[test]
fn error_register_accumulates_until_read() {
    let rig = Rig::start(TransportKind::Usb);
    rig.wire.push_line("#ZZ?\n");
    rig.wire.push_line("#KM=Q\n");
    rig.wire.push_line("#RI=1\n");
    assert_eq!(
        rig.exchange("#RE?\n"),
        re(ErrorFlags::UNKNOWN_COMMAND | ErrorFlags::INVALID_ARGS)
    );
    assert_eq!(rig.exchange("#RE?\n"), re(ErrorFlags::NONE));
}

#[test]
fn replies_and_noise_from_the_host_are_flagged() {
    let rig = Rig::start(TransportKind::Usb);
    assert_eq!(rig.command("!KM=L\n"), re(ErrorFlags::UNEXPECTED_MESSAGE));
    assert_eq!(rig.command("#K\n"), re(ErrorFlags::MESSAGE_TOO_SMALL));
    let long = format!("#SN={}\n", "1".repeat(140));
    assert_eq!(rig.command(&long), re(ErrorFlags::MESSAGE_TOO_BIG));
}

// ── Checksum framing ──────────────────────────────────────────

fn with_checksum(line: &str) -> String {
    format!("{line}:{:02X}\n", checksum(line.as_bytes()))
}

#[test]
fn checksummed_exchange_and_bit_flip() {
    let mut config = fast_config();
    config.checksum_enabled = true;
    let rig = Rig::start_with(
        TransportKind::Usb,
        config,
        std::sync::Arc::new(fieldcal_comms::fsm::remote::RemoteState::new().unwrap()),
    );

    assert_eq!(rig.exchange(&with_checksum("#KM?")), with_checksum("!KM=L"));

    // Flip one bit of the checksum field.
    let good = with_checksum("#KM?");
    let mut bytes = good.into_bytes();
    let pos = bytes.len() - 2;
    bytes[pos] ^= 0x01;
    let flipped = String::from_utf8(bytes).unwrap();
    let before = rig.wire.sent().len();
    rig.wire.push_line(&flipped);
    assert!(rig.wire.wait_for_drain(Duration::from_secs(1)));
    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(rig.wire.sent().len(), before, "corrupt line must not be answered");

    let reply = rig.exchange(&with_checksum("#RE?"));
    let expected = format!("RE={:08X}", ErrorFlags::INVALID_CHECKSUM.bits());
    assert_eq!(reply, with_checksum(&format!("!{expected}")));
}

// ── Mode-specific tables ──────────────────────────────────────

#[test]
fn production_test_mode() {
    let rig = Rig::start(TransportKind::Usb);
    rig.wire.push_line("#KM=S\n");
    assert!(rig.wait_for_mode(Mode::ProdTest));

    assert_eq!(rig.exchange("#KM?\n"), "!KM=L\n");
    rig.task.set_test_mode(true);
    assert_eq!(rig.exchange("#KM?\n"), "!KM=S\n");

    assert_eq!(rig.command("#TR=07\n"), re(ErrorFlags::NONE));
    assert_eq!(rig.command("#TR=7\n"), re(ErrorFlags::INVALID_ARGS));
    assert_eq!(*rig.instrument.self_tests.lock().unwrap(), vec![7]);
    assert_eq!(rig.exchange("#TS?\n"), "!TS=C0FFEE00\n");
    assert_eq!(rig.command("#IV?\n"), re(ErrorFlags::UNKNOWN_COMMAND));
}

#[test]
fn engineering_mode_needs_engineering_pin() {
    let rig = Rig::start(TransportKind::Usb);
    assert_eq!(rig.command("#KM=E\n"), re(ErrorFlags::INVALID_MODE));
    assert_eq!(rig.task.current_mode(), Mode::Local);

    rig.wire.push_line("#PP=187\n");
    rig.wire.push_line("#KM=E\n");
    assert!(rig.wait_for_mode(Mode::EngTest));
    assert_eq!(rig.command("#EM=-50\n"), re(ErrorFlags::NONE));
    assert_eq!(rig.exchange("#EM?\n"), "!EM=-50\n");
    assert_eq!(rig.command("#EM=150\n"), re(ErrorFlags::INVALID_ARGS));
    assert_eq!(rig.exchange("#EA?\n"), "!EA=-42\n");
}

#[test]
fn dump_streams_then_returns_to_local() {
    let rig = Rig::start(TransportKind::Usb);
    rig.instrument.load_dump(&["0001,1.000", "0002,2.000"]);
    rig.wire.push_line("#KM=D\n");
    assert!(rig.wait_for_mode(Mode::Dump));
    assert_eq!(rig.exchange("#DL?\n"), "!DL=0001,1.000\n");
    assert_eq!(rig.exchange("#DL?\n"), "!DL=0002,2.000\n");
    assert_eq!(rig.exchange("#DL?\n"), "!DL=END\n");
    assert!(rig.wait_for_mode(Mode::Local));
}

#[test]
fn bluetooth_refuses_modes_it_does_not_have() {
    let rig = Rig::start(TransportKind::Bluetooth);
    assert_eq!(rig.command("#KM=D\n"), re(ErrorFlags::INVALID_ARGS));
    assert!(!rig.task.request_mode(Mode::Dump));
    assert_eq!(rig.task.current_mode(), Mode::Local);
}

#[test]
fn external_mode_request_switches_state() {
    let rig = Rig::start(TransportKind::Usb);
    assert!(rig.task.request_mode(Mode::Remote));
    assert!(rig.wait_for_mode(Mode::Remote));
    assert!(rig.task.request_mode(Mode::Local));
    assert!(rig.wait_for_mode(Mode::Local));
}

#[test]
fn nothing_is_read_outside_run_mode() {
    let rig = Rig::start(TransportKind::Usb);
    rig.instrument
        .run_mode
        .store(false, std::sync::atomic::Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(30));
    rig.wire.push_line("#KM?\n");
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(rig.wire.inbound_len(), 1);
    assert!(rig.wire.sent().is_empty());

    rig.instrument
        .run_mode
        .store(true, std::sync::atomic::Ordering::SeqCst);
    assert!(wait_until(|| rig.wire.sent().len() == 1));
    assert_eq!(rig.wire.sent_lines()[0], "!KM=L\n");
}
