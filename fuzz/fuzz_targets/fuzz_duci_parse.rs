//! Fuzz target: `DuciParser::parse` over the Remote command table
//!
//! Feeds arbitrary text through the real Remote handlers (backed by the
//! log-only instrument) with and without checksum framing, and asserts
//! that rejected lines are never dispatched and replies always frame.
//!
//! cargo fuzz run fuzz_duci_parse

#![no_main]

use std::sync::Arc;

use fieldcal_comms::adapters::log_instrument::{LogFileStore, LogInstrument};
use fieldcal_comms::app::ports::Collaborators;
use fieldcal_comms::comms::device_info::Version;
use fieldcal_comms::comms::medium::{NullMedium, shared};
use fieldcal_comms::config::CommsConfig;
use fieldcal_comms::fsm::commands::remote_table;
use fieldcal_comms::fsm::context::{CommsLink, Session};
use fieldcal_comms::fsm::{Mode, TransportKind};
use fieldcal_comms::protocol::duci::MessageType;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = core::str::from_utf8(data) else {
        return;
    };
    let collab = Collaborators {
        instrument: Arc::new(LogInstrument::new(Version::new(1, 0, 0), Version::new(1, 0, 0))),
        store: Arc::new(LogFileStore),
    };
    let link = Arc::new(CommsLink::new(
        TransportKind::Usb,
        CommsConfig::default(),
        shared(NullMedium),
        collab,
    ));
    let mut parser = remote_table().expect("remote table builds");

    for checksum in [false, true] {
        parser.set_checksum_enabled(checksum);
        let mut session = Session::new(Mode::Remote, &link);
        for line in text.split('\n') {
            let out = parser.parse(&mut session, line);
            if !out.dispatched {
                assert!(!out.errors.is_empty(), "silent rejection of {line:?}");
                assert!(out.reply.is_none());
            }
            if let Some(reply) = out.reply {
                let framed = parser.prepare_tx_message(MessageType::Reply, &reply);
                assert!(framed.is_ok(), "reply {reply:?} does not frame");
            }
        }
    }
});
