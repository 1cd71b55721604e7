//! Protocol error bitfield.
//!
//! One bit per condition, several settable by a single parse.  The parser and
//! the command handlers OR bits into a message-local value; the session merges
//! that into its long-lived error register, which the host reads back with
//! `RE?`.  Nothing in the protocol engine unwinds on these.

use core::fmt;
use core::ops::{BitOr, BitOrAssign};

/// Accumulated protocol error bits.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ErrorFlags(u32);

impl ErrorFlags {
    pub const NONE: Self = Self(0);

    // ── Protocol syntax ──────────────────────────────────────
    pub const UNKNOWN_COMMAND: Self = Self(1 << 0);
    pub const INVALID_ARGS: Self = Self(1 << 1);
    pub const MISSING_ARGS: Self = Self(1 << 2);
    pub const MESSAGE_TOO_BIG: Self = Self(1 << 3);
    pub const MESSAGE_TOO_SMALL: Self = Self(1 << 4);
    pub const BAD_REPLY: Self = Self(1 << 5);
    pub const INVALID_CHECKSUM: Self = Self(1 << 6);

    // ── Execution ────────────────────────────────────────────
    pub const COMMAND_FAILED: Self = Self(1 << 7);
    pub const INVALID_MODE: Self = Self(1 << 8);
    pub const CAL_FAILED: Self = Self(1 << 9);
    pub const BAD_DATA: Self = Self(1 << 10);
    pub const WRITE_TO_FLASH: Self = Self(1 << 11);
    pub const NUMBER_NOT_IN_SEQUENCE: Self = Self(1 << 12);
    pub const BUFFER_SIZE: Self = Self(1 << 13);

    // ── Transport ────────────────────────────────────────────
    pub const TX_TIMEOUT: Self = Self(1 << 14);
    pub const RX_TIMEOUT: Self = Self(1 << 15);
    pub const HARDWARE_ERROR: Self = Self(1 << 16);

    // ── Routing ──────────────────────────────────────────────
    pub const UNEXPECTED_MESSAGE: Self = Self(1 << 17);
    pub const UNHANDLED_MESSAGE: Self = Self(1 << 18);

    const NAMES: [(Self, &'static str); 19] = [
        (Self::UNKNOWN_COMMAND, "unknownCommand"),
        (Self::INVALID_ARGS, "invalid_args"),
        (Self::MISSING_ARGS, "missing_args"),
        (Self::MESSAGE_TOO_BIG, "messageTooBig"),
        (Self::MESSAGE_TOO_SMALL, "messageTooSmall"),
        (Self::BAD_REPLY, "badReply"),
        (Self::INVALID_CHECKSUM, "invalidChecksum"),
        (Self::COMMAND_FAILED, "commandFailed"),
        (Self::INVALID_MODE, "invalidMode"),
        (Self::CAL_FAILED, "calFailed"),
        (Self::BAD_DATA, "badData"),
        (Self::WRITE_TO_FLASH, "writeToFlash"),
        (Self::NUMBER_NOT_IN_SEQUENCE, "numberNotInSequence"),
        (Self::BUFFER_SIZE, "bufferSize"),
        (Self::TX_TIMEOUT, "TXtimeout"),
        (Self::RX_TIMEOUT, "RXtimeout"),
        (Self::HARDWARE_ERROR, "hardwareError"),
        (Self::UNEXPECTED_MESSAGE, "unexpectedMessage"),
        (Self::UNHANDLED_MESSAGE, "unhandledMessage"),
    ];

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Return the current bits and clear the register.
    pub fn take(&mut self) -> Self {
        core::mem::take(self)
    }
}

impl BitOr for ErrorFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ErrorFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for ErrorFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ErrorFlags(0x{:08X}: {self})", self.0)
    }
}

impl fmt::Display for ErrorFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        Ok(())
    }
}
