//! PIN modes - the permission levels that gate command execution.
//!
//! A session enters a PIN mode with `#PP=nnn`.  Every command descriptor
//! carries the level it requires for each direction; the parser checks the
//! session level before invoking a handler and rejects with `invalidMode`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum PinMode {
    #[default]
    None = 0,
    Calibration = 1,
    Configuration = 2,
    Factory = 3,
    Engineering = 4,
    Upgrade = 5,
}

/// PIN code → mode table accepted by `PP`.
const PIN_CODES: [(u16, PinMode); 6] = [
    (0, PinMode::None),
    (123, PinMode::Calibration),
    (777, PinMode::Configuration),
    (800, PinMode::Factory),
    (187, PinMode::Engineering),
    (548, PinMode::Upgrade),
];

impl PinMode {
    /// Resolve a PIN code entered over the wire.
    pub fn from_code(code: u16) -> Option<Self> {
        PIN_CODES
            .iter()
            .find_map(|&(c, mode)| (c == code).then_some(mode))
    }

    /// Whether a session at `self` may run a command requiring `required`.
    ///
    /// `None` is open to everyone; any other level must match exactly.
    pub fn permits(self, required: PinMode) -> bool {
        required == PinMode::None || self == required
    }

    pub const fn level(self) -> u8 {
        self as u8
    }
}
