//! Test rig: one comms task running on its own thread against a
//! `ScriptedMedium`, with the mock instrument and store behind it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use fieldcal_comms::app::ports::Collaborators;
use fieldcal_comms::comms::fake::ScriptedMedium;
use fieldcal_comms::comms::medium::shared;
use fieldcal_comms::config::{CommsConfig, LineTerminator};
use fieldcal_comms::fsm::remote::RemoteState;
use fieldcal_comms::fsm::{Mode, TransportKind};
use fieldcal_comms::task::CommsTask;

use crate::mock_instrument::{MemoryStore, MockInstrument};

pub const WAIT: Duration = Duration::from_secs(3);

/// Short timeouts so loops turn over quickly; idle features off.
pub fn fast_config() -> CommsConfig {
    CommsConfig {
        command_timeout_ms: 20,
        not_run_sleep_ms: 5,
        auto_power_off_secs: 0,
        suspend_timeout_ms: 1000,
        discovery_interval_ms: 40,
        discovery_reply_timeout_ms: 30,
        discovery_idle_limit: 0,
        disconnect_limit: 3,
        checksum_enabled: false,
        line_terminator: LineTerminator::Lf,
    }
}

pub struct Rig {
    pub task: CommsTask,
    pub wire: ScriptedMedium,
    pub instrument: Arc<MockInstrument>,
    pub store: Arc<MemoryStore>,
}

#[allow(dead_code)]
impl Rig {
    pub fn start(transport: TransportKind) -> Self {
        Self::start_with(transport, fast_config(), Arc::new(RemoteState::new().unwrap()))
    }

    pub fn start_with(transport: TransportKind, config: CommsConfig, remote: Arc<RemoteState>) -> Self {
        let wire = ScriptedMedium::new();
        let instrument = Arc::new(MockInstrument::new());
        let store = Arc::new(MemoryStore::new());
        let collab = Collaborators {
            instrument: instrument.clone(),
            store: store.clone(),
        };
        let task = CommsTask::initialise(transport, config, shared(wire.clone()), collab, remote);
        task.spawn("comms-test\0").unwrap();
        Self {
            task,
            wire,
            instrument,
            store,
        }
    }

    /// Send one line and return the next line the task sends back.
    pub fn exchange(&self, line: &str) -> String {
        let before = self.wire.sent().len();
        self.wire.push_line(line);
        assert!(
            self.wire.wait_for_sent(before + 1, WAIT),
            "no reply to {line:?}"
        );
        self.wire.sent_lines()[before].clone()
    }

    /// Send a line that produces no reply, then read the error register.
    pub fn command(&self, line: &str) -> String {
        self.wire.push_line(line);
        self.exchange("#RE?\n")
    }

    pub fn wait_for_mode(&self, mode: Mode) -> bool {
        wait_until(|| self.task.current_mode() == mode)
    }
}

pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}
