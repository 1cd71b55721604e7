//! Fuzz target: `OwiParser::parse` over the OWI opcode table
//!
//! Splits arbitrary bytes into frames the way the OWI state does (opcode
//! byte, then the table length) and asserts that replies are always well
//! formed: ACK/NACK for writes, opcode echo plus checksum for reads.
//!
//! cargo fuzz run fuzz_owi_frame

#![no_main]

use std::sync::Arc;

use fieldcal_comms::adapters::log_instrument::{LogFileStore, LogInstrument};
use fieldcal_comms::app::ports::Collaborators;
use fieldcal_comms::comms::device_info::Version;
use fieldcal_comms::comms::medium::{NullMedium, shared};
use fieldcal_comms::config::CommsConfig;
use fieldcal_comms::fsm::commands::owi_table;
use fieldcal_comms::fsm::context::{CommsLink, OwiSession};
use fieldcal_comms::fsm::TransportKind;
use fieldcal_comms::protocol::owi::{self, ACK, NACK, Opcode};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let collab = Collaborators {
        instrument: Arc::new(LogInstrument::new(Version::new(2, 3, 4), Version::new(1, 0, 0))),
        store: Arc::new(LogFileStore),
    };
    let link = Arc::new(CommsLink::new(
        TransportKind::Owi,
        CommsConfig::default(),
        shared(NullMedium),
        collab,
    ));
    let parser = owi_table().expect("OWI table builds");
    let mut session = OwiSession::new(&link);

    let mut rest = data;
    while let Some(&first) = rest.first() {
        let len = parser.command_len(first).unwrap_or(1).min(rest.len());
        let (frame, tail) = rest.split_at(len);
        rest = tail;

        let out = parser.parse(&mut session, frame);
        let Some(reply) = out.reply else {
            continue;
        };
        if Opcode(first).is_write() {
            assert!(reply[..] == [ACK] || reply[..] == [NACK]);
        } else {
            assert!(out.dispatched);
            assert!(owi::decode_reply(first, &reply).is_ok());
        }
    }
});
