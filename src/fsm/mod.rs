//! Per-transport comms state machine.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │  CommsFsm (one per transport)                                 │
//! │  ┌─────────────────┬──────────────────────────────────────┐   │
//! │  │ Mode slot       │ CommsState                           │   │
//! │  ├─────────────────┼──────────────────────────────────────┤   │
//! │  │ Local           │ Slave(local table) / Owi(binary)     │   │
//! │  │ Remote          │ Remote(shared across transports)     │   │
//! │  │ ProdTest        │ Slave(production-test table)         │   │
//! │  │ EngTest         │ Slave(engineering table)             │   │
//! │  │ Dump            │ Slave(dump table)                    │   │
//! │  │ DeviceDiscovery │ Discovery(master table)              │   │
//! │  │ External        │ External(wire held for sensors)      │   │
//! │  └─────────────────┴──────────────────────────────────────┘   │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each dispatch runs the current slot's state until it decides to leave
//! and returns the next mode.  A transport only populates the modes it
//! supports; an empty slot is never dispatched, the FSM just waits there
//! for an external mode request.

pub mod commands;
pub mod context;
pub mod remote;
pub mod states;

use core::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::error::SystemErrorCode;
use crate::events::EventMask;
use crate::protocol::duci::TableError;

use context::CommsLink;
use remote::RemoteState;
use states::{CommsState, DiscoveryState, ExternalState, OwiState, SlaveState};

// ---------------------------------------------------------------------------
// Mode identity
// ---------------------------------------------------------------------------

/// Every mode any transport can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Mode {
    Local = 0,
    Remote = 1,
    ProdTest = 2,
    EngTest = 3,
    Dump = 4,
    DeviceDiscovery = 5,
    External = 6,
}

impl Mode {
    /// Number of slots in an FSM.
    pub const COUNT: usize = 7;

    pub const ALL: [Mode; Self::COUNT] = [
        Self::Local,
        Self::Remote,
        Self::ProdTest,
        Self::EngTest,
        Self::Dump,
        Self::DeviceDiscovery,
        Self::External,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    /// The `KM` character for modes a host can select.
    pub const fn code(self) -> Option<char> {
        match self {
            Self::Local => Some('L'),
            Self::Remote => Some('R'),
            Self::ProdTest => Some('S'),
            Self::EngTest => Some('E'),
            Self::Dump => Some('D'),
            Self::DeviceDiscovery | Self::External => None,
        }
    }

    pub fn from_code(code: char) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.code() == Some(code))
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Local => "Local",
            Self::Remote => "Remote",
            Self::ProdTest => "ProdTest",
            Self::EngTest => "EngTest",
            Self::Dump => "Dump",
            Self::DeviceDiscovery => "DeviceDiscovery",
            Self::External => "External",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Transports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Usb,
    Bluetooth,
    Serial,
    Owi,
}

impl TransportKind {
    /// Modes this transport populates.
    pub const fn modes(self) -> &'static [Mode] {
        match self {
            Self::Usb => &[
                Mode::Local,
                Mode::Remote,
                Mode::EngTest,
                Mode::ProdTest,
                Mode::Dump,
            ],
            Self::Bluetooth => &[Mode::Local, Mode::Remote],
            Self::Serial => &[Mode::Local, Mode::Remote, Mode::DeviceDiscovery],
            Self::Owi => &[Mode::Local, Mode::External],
        }
    }

    pub fn supports(self, mode: Mode) -> bool {
        self.modes().contains(&mode)
    }

    pub const fn initial_mode(self) -> Mode {
        match self {
            Self::Owi => Mode::External,
            Self::Usb | Self::Bluetooth | Self::Serial => Mode::Local,
        }
    }

    /// Code escalated when this transport's task cannot be created.
    pub const fn task_error(self) -> SystemErrorCode {
        match self {
            Self::Usb => SystemErrorCode::UsbTaskCreate,
            Self::Bluetooth => SystemErrorCode::BluetoothTaskCreate,
            Self::Serial => SystemErrorCode::SerialTaskCreate,
            Self::Owi => SystemErrorCode::OwiTaskCreate,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Usb => "USB",
            Self::Bluetooth => "Bluetooth",
            Self::Serial => "Serial",
            Self::Owi => "OWI",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// FSM engine
// ---------------------------------------------------------------------------

pub struct CommsFsm {
    link: Arc<CommsLink>,
    remote: Arc<RemoteState>,
    slots: [Option<CommsState>; Mode::COUNT],
}

impl CommsFsm {
    pub fn new(link: Arc<CommsLink>, remote: Arc<RemoteState>) -> Self {
        Self {
            link,
            remote,
            slots: Default::default(),
        }
    }

    pub fn link(&self) -> &Arc<CommsLink> {
        &self.link
    }

    /// Build the states this transport supports.  Command tables are built
    /// here, once.
    pub fn create_states(&mut self) -> Result<(), TableError> {
        let transport = self.link.transport;
        for &mode in transport.modes() {
            let state = match (transport, mode) {
                (TransportKind::Owi, Mode::Local) => CommsState::Owi(OwiState::new()?),
                (_, Mode::External) => CommsState::External(ExternalState),
                (_, Mode::Remote) => CommsState::Remote(self.remote.clone()),
                (_, Mode::DeviceDiscovery) => CommsState::Discovery(DiscoveryState::new()?),
                (TransportKind::Serial, Mode::Local) => CommsState::Slave(
                    SlaveState::new(Mode::Local)?
                        .with_idle_handover(self.link.config.discovery_idle_limit, Mode::DeviceDiscovery),
                ),
                (_, mode) => CommsState::Slave(SlaveState::new(mode)?),
            };
            self.slots[mode.index()] = Some(state);
        }
        info!("{}: states created for {:?}", transport, transport.modes());
        Ok(())
    }

    pub fn is_populated(&self, mode: Mode) -> bool {
        self.slots[mode.index()].is_some()
    }

    pub fn current_mode(&self) -> Mode {
        self.link.current_mode()
    }

    /// Enter the transport's initial mode.
    pub fn start(&self) {
        let initial = self.link.transport.initial_mode();
        info!("{}: FSM starting in {}", self.link.transport, initial);
        self.link.set_current_mode(initial);
    }

    /// Run the current mode until it hands over, then switch.
    pub fn step(&mut self) -> Mode {
        let current = self.link.current_mode();
        let next = match &mut self.slots[current.index()] {
            Some(state) => state.run(&self.link),
            None => {
                self.link.ownership.checkpoint();
                let timeout = Duration::from_millis(u64::from(self.link.config.command_timeout_ms));
                self.link.events.wait_for_event(EventMask::MODE_REQUEST, timeout);
                self.link.take_mode_request(current).unwrap_or(current)
            }
        };
        if next != current {
            info!("{}: {} -> {}", self.link.transport, current, next);
            self.link.set_current_mode(next);
        }
        next
    }

    pub fn run(&mut self) -> ! {
        self.start();
        loop {
            self.step();
        }
    }

    /// Ask the active state to hand the link over.
    pub fn suspend(&self, timeout: Duration) -> bool {
        self.link.suspend(timeout)
    }

    pub fn resume(&self) {
        self.link.resume();
    }
}
