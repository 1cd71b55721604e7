//! OWI binary link: opcode frames in, fixed-length replies and ack/nack out.

use std::time::Duration;

use fieldcal_comms::fsm::{Mode, TransportKind};
use fieldcal_comms::protocol::owi::{ACK, NACK, checksum, decode_reply, encode_frame};

use crate::rig::{Rig, wait_until};

fn owi_local() -> Rig {
    let rig = Rig::start(TransportKind::Owi);
    assert!(rig.task.request_mode(Mode::Local));
    assert!(rig.wait_for_mode(Mode::Local));
    rig
}

fn transact(rig: &Rig, frame: &[u8]) -> Vec<u8> {
    let before = rig.wire.sent().len();
    rig.wire.push_bytes(frame);
    assert!(rig.wire.wait_for_sent(before + 1, Duration::from_secs(3)));
    rig.wire.sent()[before].clone()
}

fn assert_silent(rig: &Rig, frame: &[u8]) {
    let before = rig.wire.sent().len();
    rig.wire.push_bytes(frame);
    assert!(rig.wire.wait_for_drain(Duration::from_secs(1)));
    std::thread::sleep(Duration::from_millis(80));
    assert_eq!(rig.wire.sent().len(), before);
}

#[test]
fn version_read_returns_ten_byte_reply() {
    let rig = owi_local();
    let reply = transact(&rig, &encode_frame(0x18, &[]).unwrap());

    assert_eq!(reply.len(), 10);
    assert_eq!(reply[0], 0x98);
    assert_eq!(reply[9], checksum(&reply[..9]));
    assert_eq!(
        decode_reply(0x18, &reply).unwrap(),
        &[1, 2, 0, 3, 0, 9, 1, 2][..]
    );
}

#[test]
fn serial_and_status_reads() {
    let rig = owi_local();
    let serial = transact(&rig, &encode_frame(0x19, &[]).unwrap());
    assert_eq!(decode_reply(0x19, &serial).unwrap(), &12345u32.to_be_bytes()[..]);
    let status = transact(&rig, &encode_frame(0x1A, &[]).unwrap());
    assert_eq!(decode_reply(0x1A, &status).unwrap(), &[0, 0, 0, 0xA5][..]);
}

#[test]
fn corrupt_read_gets_no_reply() {
    let rig = owi_local();
    assert_silent(&rig, &[0x18, 0x00]);
    // The link keeps working afterwards.
    assert_eq!(transact(&rig, &encode_frame(0x19, &[]).unwrap()).len(), 6);
}

#[test]
fn zero_offset_write_is_acknowledged() {
    let rig = owi_local();
    let frame = encode_frame(0x5B, &0.25f32.to_be_bytes()).unwrap();
    assert_eq!(transact(&rig, &frame), vec![ACK]);
    assert_eq!(*rig.instrument.zero.lock().unwrap(), 0.25);

    let mut bad = frame.clone();
    bad[5] = bad[5].wrapping_add(1);
    assert_eq!(transact(&rig, &bad), vec![NACK]);

    let nan = encode_frame(0x5B, &f32::NAN.to_be_bytes()).unwrap();
    assert_eq!(transact(&rig, &nan), vec![NACK]);
    assert_eq!(*rig.instrument.zero.lock().unwrap(), 0.25);
}

#[test]
fn unknown_opcode_resynchronises() {
    let rig = owi_local();
    let clears = rig.wire.clear_count();
    assert_silent(&rig, &[0x3F, 0x3F]);
    assert!(rig.wire.clear_count() > clears);
    assert_eq!(transact(&rig, &encode_frame(0x18, &[]).unwrap()).len(), 10);
}

#[test]
fn enter_mode_hands_the_wire_back() {
    let rig = owi_local();
    assert_eq!(transact(&rig, &encode_frame(0x5C, &[1]).unwrap()), vec![ACK]);
    assert!(rig.wait_for_mode(Mode::External));

    assert!(rig.task.request_mode(Mode::Local));
    assert!(rig.wait_for_mode(Mode::Local));
    assert_eq!(transact(&rig, &encode_frame(0x5C, &[9]).unwrap()), vec![NACK]);
    assert!(wait_until(|| rig.task.current_mode() == Mode::Local));
}

#[test]
fn line_fault_mid_frame_drops_the_frame() {
    let rig = owi_local();
    let before = rig.wire.sent().len();
    rig.wire.push_bytes(&[0x5B]);
    rig.wire.push_error(fieldcal_comms::error::MediumError::Hardware);
    assert!(rig.wire.wait_for_drain(Duration::from_secs(1)));
    std::thread::sleep(Duration::from_millis(80));
    // No NACK for a frame the line never delivered.
    assert_eq!(rig.wire.sent().len(), before);
    assert_eq!(*rig.instrument.zero.lock().unwrap(), 0.0);

    assert_eq!(transact(&rig, &encode_frame(0x19, &[]).unwrap()).len(), 6);
}
