//! Port traits: the boundary between the comms stack and the rest of the
//! instrument.
//!
//! ```text
//!   Comms task ──▶ Port trait ──▶ instrument layer (pressure control,
//!                                 calibration, storage, sensors)
//! ```
//!
//! The instrument layer implements these traits.  Every transport task holds
//! the same `Arc<dyn Instrument>`, so implementations use interior
//! mutability and must be `Send + Sync`.

use std::sync::Arc;

use crate::comms::device_info::Version;
use crate::comms::medium::SharedMedium;
use crate::error::SystemErrorCode;
use crate::protocol::args::{Date, Time};
use crate::protocol::errors::ErrorFlags;
use crate::protocol::pin::PinMode;

/// Longest line returned by [`Instrument::next_dump_line`].
pub const DUMP_LINE_CAP: usize = 96;

pub type DumpLine = heapless::String<DUMP_LINE_CAP>;

// ───────────────────────────────────────────────────────────────
// Instrument port (comms ↔ device)
// ───────────────────────────────────────────────────────────────

/// Device-wide services the command handlers and run loops call into.
///
/// Setters return protocol error bits so a refusal is reported in-band to
/// whoever sent the command.
pub trait Instrument: Send + Sync {
    // ── System ───────────────────────────────────────────────

    /// Whether the instrument is in run mode.  Comms loops sleep otherwise.
    fn is_run_mode(&self) -> bool;

    /// Idle timeout expired: ask the power manager to shut down.
    fn request_shutdown(&self);

    /// Escalate a systemic failure (task creation, RTOS object allocation).
    fn report_system_error(&self, code: SystemErrorCode);

    // ── Permission ───────────────────────────────────────────

    fn pin_mode(&self) -> PinMode;

    fn set_pin_mode(&self, mode: PinMode);

    // ── Identity ─────────────────────────────────────────────

    /// Device-kind code reported in `RI` as `DKnnnn`.
    fn device_kind(&self) -> u16;

    fn app_version(&self) -> Version;

    fn boot_version(&self) -> Version;

    fn serial_number(&self) -> u32;

    fn set_serial_number(&self, serial: u32) -> Result<(), ErrorFlags>;

    // ── Measurement / control ────────────────────────────────

    /// Latest measured pressure.
    fn reading(&self) -> f32;

    fn setpoint(&self) -> f32;

    fn set_setpoint(&self, value: f32) -> Result<(), ErrorFlags>;

    fn zero_offset(&self) -> f32;

    fn set_zero_offset(&self, value: f32) -> Result<(), ErrorFlags>;

    /// Device status word reported over OWI.
    fn status(&self) -> u32;

    // ── Clock ────────────────────────────────────────────────

    fn date(&self) -> Date;

    fn set_date(&self, date: Date) -> Result<(), ErrorFlags>;

    fn time(&self) -> Time;

    fn set_time(&self, time: Time) -> Result<(), ErrorFlags>;

    // ── Production / engineering test ────────────────────────

    /// Start self-test number `test`.
    fn run_self_test(&self, test: u32) -> Result<(), ErrorFlags>;

    /// Result word of the last self-test.
    fn self_test_status(&self) -> u32;

    /// Raw engineering ADC count.
    fn engineering_adc(&self) -> i32;

    fn motor_percent(&self) -> i32;

    fn set_motor_percent(&self, percent: i32) -> Result<(), ErrorFlags>;

    /// Next line of the data-log dump, `None` when finished.
    fn next_dump_line(&self) -> Option<DumpLine>;
}

// ───────────────────────────────────────────────────────────────
// File store port (comms → flash)
// ───────────────────────────────────────────────────────────────

/// Receives chunked file-transfer payloads.
pub trait FileStore: Send + Sync {
    /// Persist chunk `sequence` (starting at 1) of `filename`.
    fn write_chunk(&self, filename: &str, sequence: u16, data: &[u8]) -> Result<(), StoreError>;
}

/// Errors from [`FileStore`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// Flash partition is full.
    Full,
    /// Generic I/O error.
    IoError,
}

impl core::fmt::Display for StoreError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Full => write!(f, "store full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Sensor client port (sensor code borrowing a comms link)
// ───────────────────────────────────────────────────────────────

/// Code that temporarily takes over a comms link to query an externally
/// connected sensor.  See [`CommsTask::grab`](crate::task::CommsTask::grab).
pub trait SensorClient: Send + Sync {
    /// The link is now exclusively the client's.
    fn attach(&self, medium: SharedMedium);

    /// The link is about to be handed back.
    fn detach(&self);
}

/// Everything a comms task needs from outside the comms stack.
#[derive(Clone)]
pub struct Collaborators {
    pub instrument: Arc<dyn Instrument>,
    pub store: Arc<dyn FileStore>,
}
