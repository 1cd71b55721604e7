//! The shared Remote session: binding across transports, Remote commands,
//! chunked file upload and link-loss fallback.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use fieldcal_comms::fsm::remote::RemoteState;
use fieldcal_comms::fsm::{Mode, TransportKind};
use fieldcal_comms::protocol::ErrorFlags;

use crate::mock_instrument::StoredChunk;
use crate::rig::{Rig, fast_config, wait_until};

fn re(flags: ErrorFlags) -> String {
    format!("!RE={:08X}\n", flags.bits())
}

fn enter_remote(rig: &Rig) {
    rig.wire.push_line("#KM=R\n");
    assert!(rig.wait_for_mode(Mode::Remote));
}

fn chunk(sequence: u16, data: &str) -> String {
    format!(
        "#UF={sequence:04},{:03},{data},{:08X}\n",
        data.len(),
        crc32fast::hash(data.as_bytes())
    )
}

#[test]
fn bluetooth_falls_back_while_usb_holds_remote() {
    let remote = Arc::new(RemoteState::new().unwrap());
    let usb = Rig::start_with(TransportKind::Usb, fast_config(), remote.clone());
    let bt = Rig::start_with(TransportKind::Bluetooth, fast_config(), remote.clone());

    enter_remote(&usb);
    assert!(wait_until(|| remote.bound_to() == Some(TransportKind::Usb)));

    bt.wire.push_line("#KM=R\n");
    assert_eq!(bt.exchange("#KM?\n"), "!KM=L\n");
    assert_eq!(bt.task.current_mode(), Mode::Local);
    assert_eq!(remote.bound_to(), Some(TransportKind::Usb));

    // A second refusal must not have released the holder either.
    bt.wire.push_line("#KM=R\n");
    assert_eq!(bt.exchange("#KM?\n"), "!KM=L\n");
    assert_eq!(remote.bound_to(), Some(TransportKind::Usb));
    assert_eq!(usb.task.current_mode(), Mode::Remote);

    usb.wire.push_line("#KM=L\n");
    assert!(usb.wait_for_mode(Mode::Local));
    assert!(wait_until(|| remote.bound_to().is_none()));

    enter_remote(&bt);
    assert!(wait_until(|| remote.bound_to() == Some(TransportKind::Bluetooth)));
}

#[test]
fn clock_and_setpoint_commands() {
    let rig = Rig::start(TransportKind::Usb);
    enter_remote(&rig);

    assert_eq!(rig.command("#SD=29/02/2024\n"), re(ErrorFlags::NONE));
    assert_eq!(rig.exchange("#RD?\n"), "!RD=29/02/2024\n");
    assert_eq!(rig.command("#SD=29/02/2023\n"), re(ErrorFlags::INVALID_ARGS));

    assert_eq!(rig.command("#ST=12:30:45\n"), re(ErrorFlags::NONE));
    assert_eq!(rig.exchange("#RT?\n"), "!RT=12:30:45\n");

    assert_eq!(rig.command("#SP=2.5\n"), re(ErrorFlags::NONE));
    assert_eq!(rig.exchange("#SP?\n"), "!SP=2.5\n");
    assert_eq!(rig.exchange("#IV?\n"), "!IV=1.5\n");
}

#[test]
fn chunked_upload() {
    let rig = Rig::start(TransportKind::Usb);
    enter_remote(&rig);

    assert_eq!(rig.command("#FN=cal.bin\n"), re(ErrorFlags::INVALID_MODE));
    assert_eq!(rig.command("#PP=548\n"), re(ErrorFlags::NONE));
    assert_eq!(rig.command(&chunk(1, "early")), re(ErrorFlags::COMMAND_FAILED));

    assert_eq!(rig.command("#FN=cal.bin\n"), re(ErrorFlags::NONE));
    assert_eq!(rig.exchange("#FN?\n"), "!FN=cal.bin\n");
    assert_eq!(rig.command(&chunk(1, "hello,world")), re(ErrorFlags::NONE));
    assert_eq!(rig.command(&chunk(3, "skipped")), re(ErrorFlags::NUMBER_NOT_IN_SEQUENCE));
    assert_eq!(rig.command(&chunk(2, "again")), re(ErrorFlags::NONE));

    let bad_crc = "#UF=0003,004,data,00000000\n";
    assert_eq!(rig.command(bad_crc), re(ErrorFlags::BAD_DATA));
    let short = format!("#UF=0003,009,data,{:08X}\n", crc32fast::hash(b"data"));
    assert_eq!(rig.command(&short), re(ErrorFlags::BAD_DATA));
    let big = "x".repeat(97);
    assert_eq!(rig.command(&chunk(3, &big)), re(ErrorFlags::BUFFER_SIZE));

    rig.store.fail.store(true, Ordering::SeqCst);
    assert_eq!(rig.command(&chunk(3, "full")), re(ErrorFlags::WRITE_TO_FLASH));

    assert_eq!(
        rig.store.chunks(),
        vec![
            StoredChunk {
                filename: "cal.bin".into(),
                sequence: 1,
                data: b"hello,world".to_vec(),
            },
            StoredChunk {
                filename: "cal.bin".into(),
                sequence: 2,
                data: b"again".to_vec(),
            },
        ]
    );
}

#[test]
fn remote_falls_back_when_link_drops() {
    let remote = Arc::new(RemoteState::new().unwrap());
    let rig = Rig::start_with(TransportKind::Serial, fast_config(), remote.clone());
    enter_remote(&rig);
    assert!(wait_until(|| remote.bound_to() == Some(TransportKind::Serial)));

    rig.wire.set_connected(false);
    assert!(rig.wait_for_mode(Mode::Local));
    assert!(wait_until(|| remote.bound_to().is_none()));

    rig.wire.set_connected(true);
    assert_eq!(rig.exchange("#KM?\n"), "!KM=L\n");
}

#[test]
fn remote_session_state_does_not_survive_reentry() {
    let rig = Rig::start(TransportKind::Usb);
    rig.wire.push_line("#PP=548\n");
    enter_remote(&rig);
    assert_eq!(rig.command("#FN=cal.bin\n"), re(ErrorFlags::NONE));

    rig.wire.push_line("#KM=L\n");
    assert!(rig.wait_for_mode(Mode::Local));
    enter_remote(&rig);
    assert_eq!(rig.exchange("#FN?\n"), "!FN=\n");
}
