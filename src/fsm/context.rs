//! Shared context threaded through the comms states.
//!
//! [`CommsLink`] is everything one transport's states share with each other
//! and with the task's public surface: the medium, the ownership handshake,
//! the event group, the current mode.  [`Session`] is the blackboard a DUCI
//! command handler reads and writes while one state is running; it is built
//! fresh on every state entry, which is what resets the error register.

use core::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use heapless::String;
use log::info;

use crate::app::ports::{Collaborators, FileStore, Instrument};
use crate::comms::device_info::{DeviceIdentity, SharedDeviceInfo};
use crate::comms::medium::SharedMedium;
use crate::comms::ownership::Ownership;
use crate::config::CommsConfig;
use crate::events::{EventMask, TaskEvents};
use crate::protocol::args::MAX_STRING_LEN;
use crate::protocol::duci::ParserContext;
use crate::protocol::errors::ErrorFlags;
use crate::protocol::pin::PinMode;

use super::states::IdleSupervisor;
use super::{Mode, TransportKind};

// ---------------------------------------------------------------------------
// Per-transport link
// ---------------------------------------------------------------------------

pub struct CommsLink {
    pub transport: TransportKind,
    pub config: CommsConfig,
    pub medium: SharedMedium,
    pub ownership: Ownership,
    pub events: TaskEvents,
    pub device_info: SharedDeviceInfo,
    pub collab: Collaborators,
    test_mode: AtomicBool,
    current: Mutex<CriticalSectionRawMutex, Cell<Mode>>,
    requested: Mutex<CriticalSectionRawMutex, Cell<Option<Mode>>>,
    idle: Mutex<CriticalSectionRawMutex, Cell<IdleSupervisor>>,
}

impl CommsLink {
    pub fn new(
        transport: TransportKind,
        config: CommsConfig,
        medium: SharedMedium,
        collab: Collaborators,
    ) -> Self {
        let idle = IdleSupervisor::new(config.idle_timeout_limit());
        Self {
            transport,
            config,
            medium,
            ownership: Ownership::new(),
            events: TaskEvents::new(),
            device_info: SharedDeviceInfo::new(),
            collab,
            test_mode: AtomicBool::new(false),
            current: Mutex::new(Cell::new(transport.initial_mode())),
            requested: Mutex::new(Cell::new(None)),
            idle: Mutex::new(Cell::new(idle)),
        }
    }

    pub fn instrument(&self) -> &dyn Instrument {
        &*self.collab.instrument
    }

    pub fn store(&self) -> &dyn FileStore {
        &*self.collab.store
    }

    pub fn current_mode(&self) -> Mode {
        self.current.lock(Cell::get)
    }

    pub fn set_current_mode(&self, mode: Mode) {
        self.current.lock(|c| c.set(mode));
    }

    /// Ask the FSM to move to `mode` at its next loop check.  Refused for
    /// modes this transport does not populate.
    pub fn request_mode(&self, mode: Mode) -> bool {
        if !self.transport.supports(mode) {
            return false;
        }
        self.requested.lock(|c| c.set(Some(mode)));
        self.events.set(EventMask::MODE_REQUEST);
        true
    }

    /// Consume a pending mode request, if it names a mode other than `own`.
    pub fn take_mode_request(&self, own: Mode) -> Option<Mode> {
        let requested = self.requested.lock(|c| c.take());
        if requested.is_some() {
            self.events.clear(EventMask::MODE_REQUEST);
        }
        requested.filter(|&m| m != own)
    }

    pub fn set_test_mode(&self, running: bool) {
        info!("{}: self-test subsystem running = {running}", self.transport);
        self.test_mode.store(running, Ordering::SeqCst);
    }

    pub fn test_mode(&self) -> bool {
        self.test_mode.load(Ordering::SeqCst)
    }

    pub fn suspend(&self, timeout: Duration) -> bool {
        self.ownership.suspend(timeout)
    }

    pub fn resume(&self) {
        self.ownership.resume();
    }

    /// Record one quiet receive timeout; `true` when auto power-off is due.
    pub fn idle_tick(&self) -> bool {
        self.idle.lock(|c| {
            let mut idle = c.get();
            let fired = idle.tick();
            c.set(idle);
            fired
        })
    }

    pub fn idle_reset(&self) {
        self.idle.lock(|c| {
            let mut idle = c.get();
            idle.reset();
            c.set(idle);
        });
    }

    pub fn idle_count(&self) -> u32 {
        self.idle.lock(|c| c.get().count())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.config.command_timeout_ms))
    }
}

// ---------------------------------------------------------------------------
// DUCI session blackboard
// ---------------------------------------------------------------------------

/// Chunked file upload in progress (`FN` then `UF`).
#[derive(Debug, Default)]
pub struct Upload {
    pub filename: Option<String<MAX_STRING_LEN>>,
    pub next_sequence: u16,
}

/// Fields filled by master-side reply handlers during discovery.
#[derive(Debug, Default, Clone, Copy)]
pub struct Probe {
    pub identity: Option<DeviceIdentity>,
    pub serial: Option<u32>,
}

pub struct Session {
    /// The mode of the state this session belongs to.
    pub mode: Mode,
    /// Set by handlers to leave the current mode.
    pub next_mode: Mode,
    /// Long-lived error register, read back with `RE?`.
    pub errors: ErrorFlags,
    pub link: Arc<CommsLink>,
    pub upload: Upload,
    pub probe: Probe,
}

impl Session {
    pub fn new(mode: Mode, link: &Arc<CommsLink>) -> Self {
        Self {
            mode,
            next_mode: mode,
            errors: ErrorFlags::NONE,
            link: link.clone(),
            upload: Upload::default(),
            probe: Probe::default(),
        }
    }

    pub fn instrument(&self) -> &dyn Instrument {
        self.link.instrument()
    }
}

impl ParserContext for Session {
    fn pin_mode(&self) -> PinMode {
        self.link.instrument().pin_mode()
    }
}

/// Context for OWI binary handlers.
pub struct OwiSession {
    pub next_mode: Mode,
    pub link: Arc<CommsLink>,
}

impl OwiSession {
    pub fn new(link: &Arc<CommsLink>) -> Self {
        Self {
            next_mode: Mode::Local,
            link: link.clone(),
        }
    }

    pub fn instrument(&self) -> &dyn Instrument {
        self.link.instrument()
    }
}
