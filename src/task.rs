//! Comms task: the concurrent owner of one transport.
//!
//! ```text
//!            ┌──────────────────────────────── CommsTask ─┐
//!  grab() ──▶│ suspend ─▶ Ownership ◀─ checkpoint ─ FSM   │
//!  release()▶│ resume  ─┘                           │     │
//!            │                               Medium ◀─────┼── wire
//!            └────────────────────────────────────────────┘
//! ```
//!
//! The task body builds the FSM's states once and then runs the FSM
//! forever on its own thread.  Everything else on this type is the surface
//! other subsystems use while the task runs.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{error, info, warn};

use crate::app::ports::{Collaborators, SensorClient};
use crate::comms::device_info::ExternalDeviceInfo;
use crate::comms::medium::SharedMedium;
use crate::config::CommsConfig;
use crate::drivers::task_pin::{Core, spawn_on_core};
use crate::error::{Error, SystemErrorCode};
use crate::events::EventMask;
use crate::fsm::context::CommsLink;
use crate::fsm::remote::RemoteState;
use crate::fsm::{CommsFsm, Mode, TransportKind};

/// Thread parameters for one comms task.
#[derive(Debug, Clone, Copy)]
pub struct TaskParams {
    pub core: Core,
    pub priority: u8,
    pub stack_kb: usize,
}

impl TaskParams {
    /// Protocol tasks sit with the radio stacks on the PRO core.
    pub const fn for_transport(transport: TransportKind) -> Self {
        match transport {
            TransportKind::Bluetooth => Self {
                core: Core::Pro,
                priority: 4,
                stack_kb: 8,
            },
            TransportKind::Usb | TransportKind::Serial | TransportKind::Owi => Self {
                core: Core::Pro,
                priority: 5,
                stack_kb: 8,
            },
        }
    }
}

pub struct CommsTask {
    link: Arc<CommsLink>,
    remote: Arc<RemoteState>,
}

impl CommsTask {
    /// Wire up the medium and the FSM context for `transport`.  States are
    /// built later, on the task's own thread.
    pub fn initialise(
        transport: TransportKind,
        config: CommsConfig,
        medium: SharedMedium,
        collab: Collaborators,
        remote: Arc<RemoteState>,
    ) -> Self {
        info!("{}: comms task initialised ({:?})", transport, transport.modes());
        Self {
            link: Arc::new(CommsLink::new(transport, config, medium, collab)),
            remote,
        }
    }

    pub fn transport(&self) -> TransportKind {
        self.link.transport
    }

    /// Task body.  Returns only if the command tables cannot be built.
    pub fn run_function(link: Arc<CommsLink>, remote: Arc<RemoteState>) -> Error {
        let mut fsm = CommsFsm::new(link.clone(), remote);
        if let Err(e) = fsm.create_states() {
            error!("{}: cannot build states: {e}", link.transport);
            link.instrument().report_system_error(SystemErrorCode::CommandTableFull);
            return Error::Init(SystemErrorCode::CommandTableFull);
        }
        fsm.run()
    }

    /// Start the task on its own thread.
    pub fn spawn(&self, name: &'static str) -> Result<JoinHandle<()>, Error> {
        let transport = self.link.transport;
        let params = TaskParams::for_transport(transport);
        let link = self.link.clone();
        let remote = self.remote.clone();
        spawn_on_core(params.core, params.priority, params.stack_kb, name, move || {
            let err = Self::run_function(link, remote);
            error!("{transport}: comms task stopped: {err}");
        })
        .map_err(|e| {
            error!("{transport}: thread creation failed: {e}");
            let code = transport.task_error();
            self.link.instrument().report_system_error(code);
            Error::Init(code)
        })
    }

    /// Take the wire away from the FSM for `sensor`.  Returns `false` if the
    /// active state did not hand over in time.
    pub fn grab(&self, sensor: &dyn SensorClient) -> bool {
        let timeout = Duration::from_millis(u64::from(self.link.config.suspend_timeout_ms));
        if !self.link.suspend(timeout) {
            warn!("{}: grab refused", self.link.transport);
            return false;
        }
        info!("{}: link grabbed", self.link.transport);
        sensor.attach(self.link.medium.clone());
        true
    }

    /// Give the wire back to the FSM.
    pub fn release(&self, sensor: &dyn SensorClient) {
        sensor.detach();
        self.link.resume();
        info!("{}: link released", self.link.transport);
    }

    pub fn connected_device_info(&self) -> ExternalDeviceInfo {
        self.link.device_info.get()
    }

    pub fn set_test_mode(&self, running: bool) {
        self.link.set_test_mode(running);
    }

    /// Ask the FSM to switch mode.  `false` if this transport has no such mode.
    pub fn request_mode(&self, mode: Mode) -> bool {
        self.link.request_mode(mode)
    }

    pub fn current_mode(&self) -> Mode {
        self.link.current_mode()
    }

    /// Block until any event in `mask` is raised or `timeout` passes.
    pub fn wait_for_event(&self, mask: EventMask, timeout: Duration) -> EventMask {
        self.link.events.wait_for_event(mask, timeout)
    }

    pub fn link(&self) -> &Arc<CommsLink> {
        &self.link
    }
}
