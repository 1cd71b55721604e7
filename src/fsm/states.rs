//! Comms state behaviours.
//!
//! Each state owns its parser and runs a blocking loop until it decides to
//! leave, then returns the next mode.  Every loop iteration:
//!
//! 1. honours an ownership handover (`checkpoint`)
//! 2. honours an external mode request
//! 3. sleeps while the instrument is not in run mode
//! 4. receives one line / frame with a bounded timeout and handles it
//!
//! Receive timeouts feed the idle supervisor, which asks the instrument to
//! shut down once the configured auto power-off time has passed in silence.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::comms::device_info::{ExternalDeviceInfo, is_supported_kind};
use crate::comms::medium::{RxLine, with_medium};
use crate::error::MediumError;
use crate::events::EventMask;
use crate::protocol::duci::{DuciParser, MessageType, TableError};
use crate::protocol::errors::ErrorFlags;
use crate::protocol::owi::{MAX_FRAME_LEN, OwiParser};

use super::commands;
use super::context::{CommsLink, OwiSession, Session};
use super::remote::RemoteState;
use super::Mode;

// ---------------------------------------------------------------------------
// State variants
// ---------------------------------------------------------------------------

pub enum CommsState {
    /// DUCI slave: Local, ProdTest, EngTest, Dump.
    Slave(SlaveState),
    /// The Remote session shared by all transports.
    Remote(Arc<RemoteState>),
    /// DUCI master probing an attached device.
    Discovery(DiscoveryState),
    /// OWI binary slave.
    Owi(OwiState),
    /// Link held for sensor code; no protocol traffic.
    External(ExternalState),
}

impl CommsState {
    pub fn run(&mut self, link: &Arc<CommsLink>) -> Mode {
        match self {
            Self::Slave(s) => s.run(link),
            Self::Remote(r) => r.run(link),
            Self::Discovery(d) => d.run(link),
            Self::Owi(o) => o.run(link),
            Self::External(e) => e.run(link),
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            Self::Slave(s) => s.mode,
            Self::Remote(_) => Mode::Remote,
            Self::Discovery(_) => Mode::DeviceDiscovery,
            Self::Owi(_) => Mode::Local,
            Self::External(_) => Mode::External,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared loop helpers
// ---------------------------------------------------------------------------

/// Counts consecutive receive timeouts and fires once per idle period.
///
/// One lives on each [`CommsLink`] so the count carries across mode changes
/// that happen without host traffic (serial Local ↔ discovery).
#[derive(Debug, Clone, Copy)]
pub struct IdleSupervisor {
    limit: Option<u32>,
    count: u32,
    fired: bool,
}

impl IdleSupervisor {
    pub fn new(limit: Option<u32>) -> Self {
        Self {
            limit,
            count: 0,
            fired: false,
        }
    }

    /// Record one timeout.  Returns `true` exactly once when the limit is hit.
    pub fn tick(&mut self) -> bool {
        self.count = self.count.saturating_add(1);
        match self.limit {
            Some(limit) if !self.fired && self.count >= limit => {
                self.fired = true;
                true
            }
            _ => false,
        }
    }

    /// Traffic arrived: start a new idle period.
    pub fn reset(&mut self) {
        self.count = 0;
        self.fired = false;
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

fn idle_timeout(link: &CommsLink) {
    if link.idle_tick() {
        warn!(
            "{}: no traffic for {}s, requesting shutdown",
            link.transport, link.config.auto_power_off_secs
        );
        link.instrument().request_shutdown();
        link.events.set(EventMask::IDLE_SHUTDOWN);
    }
}

/// Common top-of-loop checks.  `Some(mode)` means leave now.
fn loop_gate(link: &CommsLink, own: Mode) -> Option<Mode> {
    link.ownership.checkpoint();
    if let Some(requested) = link.take_mode_request(own) {
        return Some(requested);
    }
    if !link.instrument().is_run_mode() {
        thread::sleep(Duration::from_millis(u64::from(link.config.not_run_sleep_ms)));
        return Some(own);
    }
    None
}

fn receive_line(link: &CommsLink, timeout_ms: u32) -> Result<RxLine, MediumError> {
    with_medium(&link.medium, |m| {
        m.clear_rx_buffer();
        m.receive_string(timeout_ms)
    })
}

fn send_line(link: &CommsLink, line: &str) -> Result<(), MediumError> {
    with_medium(&link.medium, |m| m.send_string(line, link.config.command_timeout_ms))
}

/// Optional exit after a run of idle timeouts (serial Local → discovery).
#[derive(Debug, Clone, Copy)]
pub struct IdleHandover {
    pub after: u32,
    pub to: Mode,
}

/// The DUCI slave loop shared by every slave mode and by Remote.
pub fn serve(
    parser: &DuciParser<Session>,
    mode: Mode,
    link: &Arc<CommsLink>,
    handover: Option<IdleHandover>,
) -> Mode {
    let mut session = Session::new(mode, link);
    if mode == Mode::Local {
        link.device_info.clear();
    }
    let mut quiet: u32 = 0;
    let mut disconnected: u32 = 0;

    loop {
        match loop_gate(link, mode) {
            Some(next) if next != mode => return next,
            Some(_) => continue,
            None => {}
        }

        let connected = with_medium(&link.medium, |m| m.is_connected());
        if connected {
            disconnected = 0;
        } else {
            disconnected += 1;
            if mode != Mode::Local && disconnected >= link.config.disconnect_limit {
                warn!("{}: link lost in {}, returning to Local", link.transport, mode);
                return Mode::Local;
            }
        }

        match receive_line(link, link.config.command_timeout_ms) {
            Ok(line) => {
                link.idle_reset();
                quiet = 0;
                handle_line(parser, &mut session, link, &line);
            }
            Err(MediumError::Timeout) => {
                // A link with nothing attached is not an idle user.
                if connected {
                    idle_timeout(link);
                }
                quiet += 1;
                if let Some(h) = handover.filter(|h| quiet >= h.after) {
                    debug!("{}: {} quiet timeouts, handing over to {}", link.transport, quiet, h.to);
                    return h.to;
                }
            }
            Err(MediumError::Overflow) => {
                session.errors |= ErrorFlags::MESSAGE_TOO_BIG;
                warn!("{}: inbound line overflowed the receive buffer", link.transport);
            }
            Err(e) => {
                session.errors |= e.rx_flags();
                thread::sleep(Duration::from_millis(u64::from(link.config.not_run_sleep_ms)));
            }
        }

        if session.next_mode != mode {
            return session.next_mode;
        }
    }
}

fn handle_line(parser: &DuciParser<Session>, session: &mut Session, link: &CommsLink, line: &str) {
    debug!("{} rx: {}", link.transport, line.trim_end());
    let outcome = parser.parse(session, line);
    session.errors |= outcome.errors;
    if !outcome.errors.is_empty() {
        warn!("{}: {:?} -> {}", link.transport, line.trim_end(), outcome.errors);
    }
    if outcome.kind != MessageType::Command {
        return;
    }
    let Some(body) = outcome.reply else {
        return;
    };
    match parser.prepare_tx_message(MessageType::Reply, &body) {
        Ok(tx) => {
            if let Err(e) = send_line(link, &tx) {
                session.errors |= e.tx_flags();
            }
        }
        Err(e) => session.errors |= e,
    }
}

// ---------------------------------------------------------------------------
// DUCI slave
// ---------------------------------------------------------------------------

pub struct SlaveState {
    pub mode: Mode,
    parser: DuciParser<Session>,
    handover: Option<IdleHandover>,
}

impl SlaveState {
    pub fn new(mode: Mode) -> Result<Self, TableError> {
        Ok(Self {
            mode,
            parser: commands::table_for(mode)?,
            handover: None,
        })
    }

    pub fn with_idle_handover(mut self, after: u32, to: Mode) -> Self {
        self.handover = (after > 0).then_some(IdleHandover { after, to });
        self
    }

    fn run(&mut self, link: &Arc<CommsLink>) -> Mode {
        self.parser.set_checksum_enabled(link.config.checksum_enabled);
        self.parser.set_terminator(link.config.line_terminator);
        serve(&self.parser, self.mode, link, self.handover)
    }
}

// ---------------------------------------------------------------------------
// Device discovery (DUCI master)
// ---------------------------------------------------------------------------

pub struct DiscoveryState {
    parser: DuciParser<Session>,
}

impl DiscoveryState {
    pub fn new() -> Result<Self, TableError> {
        Ok(Self {
            parser: commands::discovery_table()?,
        })
    }

    /// Send one query and parse the answer into `session.probe`.
    fn probe(&self, link: &CommsLink, session: &mut Session, query: &str) -> bool {
        let Ok(tx) = self.parser.prepare_tx_message(MessageType::Command, query) else {
            return false;
        };
        let timeout = link.config.discovery_reply_timeout_ms;
        let rx = with_medium(&link.medium, |m| {
            m.clear_rx_buffer();
            m.send_string(&tx, timeout)?;
            m.receive_string(timeout)
        });
        match rx {
            Ok(line) => {
                let outcome = self.parser.parse(session, &line);
                session.errors |= outcome.errors;
                if outcome.kind != MessageType::Reply {
                    session.errors |= ErrorFlags::BAD_REPLY;
                }
                outcome.dispatched && outcome.errors.is_empty()
            }
            Err(e) => {
                session.errors |= e.rx_flags();
                false
            }
        }
    }

    fn lost(link: &CommsLink, why: &str) -> Mode {
        info!("{}: discovery {why}, returning to Local", link.transport);
        link.device_info.clear();
        link.events.set(EventMask::DEVICE_INFO_CHANGED);
        Mode::Local
    }

    fn run(&mut self, link: &Arc<CommsLink>) -> Mode {
        self.parser.set_checksum_enabled(link.config.checksum_enabled);
        self.parser.set_terminator(link.config.line_terminator);
        let mut session = Session::new(Mode::DeviceDiscovery, link);
        link.device_info.clear();
        let interval = Duration::from_millis(u64::from(link.config.discovery_interval_ms));

        loop {
            match loop_gate(link, Mode::DeviceDiscovery) {
                Some(Mode::DeviceDiscovery) => continue,
                Some(next) => return next,
                None => {}
            }
            let started = Instant::now();
            session.probe = Default::default();

            if !self.probe(link, &mut session, "RI?") {
                // Nobody answering counts toward auto power-off like a quiet host.
                if !link.device_info.get().connected {
                    idle_timeout(link);
                }
                return Self::lost(link, "got no identity");
            }
            if !self.probe(link, &mut session, "SN?") {
                return Self::lost(link, "got no serial number");
            }
            let (Some(identity), Some(serial)) = (session.probe.identity, session.probe.serial) else {
                return Self::lost(link, "got an incomplete reply");
            };

            let before = link.device_info.get();
            if before.identified && before.serial_number != serial {
                warn!(
                    "{}: device swapped (SN {} -> {})",
                    link.transport, before.serial_number, serial
                );
                return Self::lost(link, "saw a device swap");
            }

            let supported = is_supported_kind(identity.kind);
            let info = ExternalDeviceInfo {
                connected: true,
                supported,
                identified: supported,
                identity,
                serial_number: serial,
            };
            if info != before {
                info!("{}: found {} SN {} (supported={})", link.transport, identity, serial, supported);
                link.device_info.set(info);
                link.events.set(EventMask::DEVICE_INFO_CHANGED);
            }

            let rest = interval.saturating_sub(started.elapsed());
            // Wakes early on a mode request; the gate picks it up.
            link.events.wait_for_event(EventMask::MODE_REQUEST, rest);
        }
    }
}

// ---------------------------------------------------------------------------
// OWI slave
// ---------------------------------------------------------------------------

pub struct OwiState {
    parser: OwiParser<OwiSession>,
}

impl OwiState {
    pub fn new() -> Result<Self, TableError> {
        let parser = commands::owi_table().map_err(|e| {
            warn!("OWI table: {e}");
            TableError::Mismatch
        })?;
        Ok(Self { parser })
    }

    fn run(&mut self, link: &Arc<CommsLink>) -> Mode {
        let mut session = OwiSession::new(link);
        let mut errors = ErrorFlags::NONE;
        let timeout = link.config.command_timeout_ms;

        loop {
            match loop_gate(link, Mode::Local) {
                Some(Mode::Local) => continue,
                Some(next) => return next,
                None => {}
            }

            let mut frame = [0u8; MAX_FRAME_LEN];
            let first = with_medium(&link.medium, |m| m.read(&mut frame[..1], timeout));
            match first {
                Ok(1) => link.idle_reset(),
                Ok(_) | Err(MediumError::Timeout) => {
                    if with_medium(&link.medium, |m| m.is_connected()) {
                        idle_timeout(link);
                    }
                    continue;
                }
                Err(e) => {
                    errors |= e.rx_flags();
                    continue;
                }
            }

            let Some(len) = self.parser.command_len(frame[0]) else {
                // Unknown opcode or a stray reply: resynchronise.
                let outcome = self.parser.parse(&mut session, &frame[..1]);
                errors |= outcome.errors;
                with_medium(&link.medium, |m| m.clear_rx_buffer());
                continue;
            };
            let got = match with_medium(&link.medium, |m| m.read(&mut frame[1..len], timeout)) {
                Ok(got) => got,
                Err(MediumError::Timeout) => 0,
                Err(e) => {
                    errors |= e.rx_flags();
                    warn!("OWI: frame 0x{:02X} dropped: {}", frame[0], e);
                    with_medium(&link.medium, |m| m.clear_rx_buffer());
                    continue;
                }
            };

            let outcome = self.parser.parse(&mut session, &frame[..1 + got]);
            errors |= outcome.errors;
            if !outcome.errors.is_empty() {
                debug!("OWI: frame 0x{:02X} -> {}", frame[0], outcome.errors);
            }
            if let Some(reply) = outcome.reply {
                if let Err(e) = with_medium(&link.medium, |m| m.write(&reply, timeout)) {
                    errors |= e.tx_flags();
                }
            }
            if session.next_mode != Mode::Local {
                debug!("OWI: leaving Local, accumulated errors {}", errors);
                return session.next_mode;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// External
// ---------------------------------------------------------------------------

/// Leaves the wire idle for sensor code until someone requests another mode.
pub struct ExternalState;

impl ExternalState {
    fn run(&mut self, link: &Arc<CommsLink>) -> Mode {
        loop {
            link.ownership.checkpoint();
            if let Some(next) = link.take_mode_request(Mode::External) {
                return next;
            }
            link.events.wait_for_event(EventMask::MODE_REQUEST, link.command_timeout());
            if let Some(next) = link.take_mode_request(Mode::External) {
                return next;
            }
        }
    }
}
