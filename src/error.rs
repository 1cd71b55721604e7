//! Unified error types for the comms firmware.
//!
//! Protocol-level failures never travel through these types: they are
//! accumulated in [`ErrorFlags`](crate::protocol::errors::ErrorFlags) and
//! reported in-band.  The enums here cover the plumbing underneath (transport
//! I/O, task creation, configuration) so that every subsystem funnels into a
//! single `Copy` error the task layer can log or escalate.

use core::fmt;

use crate::protocol::errors::ErrorFlags;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible non-protocol operation in the comms stack funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A transport medium operation failed.
    Medium(MediumError),
    /// A task or RTOS object could not be created.
    Init(SystemErrorCode),
    /// Configuration is invalid.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Medium(e) => write!(f, "medium: {e}"),
            Self::Init(code) => write!(f, "init: {code}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl core::error::Error for Error {}

// ---------------------------------------------------------------------------
// Transport medium errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediumError {
    /// Nothing arrived (or could be sent) within the timeout.
    Timeout,
    /// The physical link is down (cable unplugged, BLE link lost).
    Disconnected,
    /// The peripheral reported an error.
    Hardware,
    /// The line or frame did not fit the receive buffer.
    Overflow,
}

impl MediumError {
    /// Map a receive-side failure onto the protocol error bitfield.
    pub fn rx_flags(self) -> ErrorFlags {
        match self {
            Self::Timeout => ErrorFlags::RX_TIMEOUT,
            Self::Disconnected | Self::Hardware => ErrorFlags::HARDWARE_ERROR,
            Self::Overflow => ErrorFlags::BUFFER_SIZE,
        }
    }

    /// Map a transmit-side failure onto the protocol error bitfield.
    pub fn tx_flags(self) -> ErrorFlags {
        match self {
            Self::Timeout => ErrorFlags::TX_TIMEOUT,
            Self::Disconnected | Self::Hardware => ErrorFlags::HARDWARE_ERROR,
            Self::Overflow => ErrorFlags::BUFFER_SIZE,
        }
    }
}

impl fmt::Display for MediumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out"),
            Self::Disconnected => write!(f, "link disconnected"),
            Self::Hardware => write!(f, "hardware error"),
            Self::Overflow => write!(f, "buffer overflow"),
        }
    }
}

impl From<MediumError> for Error {
    fn from(e: MediumError) -> Self {
        Self::Medium(e)
    }
}

// ---------------------------------------------------------------------------
// System error codes
// ---------------------------------------------------------------------------

/// Unique originating codes handed to the device-wide error handler when a
/// systemic failure (task creation, RTOS object allocation) occurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SystemErrorCode {
    UsbTaskCreate = 0x0301,
    BluetoothTaskCreate = 0x0302,
    SerialTaskCreate = 0x0303,
    OwiTaskCreate = 0x0304,
    CommandTableFull = 0x0310,
}

impl SystemErrorCode {
    pub const fn code(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for SystemErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self {
            Self::UsbTaskCreate => "USB comms task creation failed",
            Self::BluetoothTaskCreate => "Bluetooth comms task creation failed",
            Self::SerialTaskCreate => "serial comms task creation failed",
            Self::OwiTaskCreate => "OWI comms task creation failed",
            Self::CommandTableFull => "command table capacity exceeded",
        };
        write!(f, "{what} (0x{:04X})", self.code())
    }
}

impl From<SystemErrorCode> for Error {
    fn from(code: SystemErrorCode) -> Self {
        Self::Init(code)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
