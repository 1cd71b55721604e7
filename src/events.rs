//! Per-task event-flag group.
//!
//! Events are produced by:
//! - collaborators (mode change requests for a transport)
//! - the comms states themselves (device info changed, idle shutdown)
//!
//! Each comms task owns one group.  Waiters block in
//! [`TaskEvents::wait_for_event`] until any bit of their mask is set, and
//! consume the bits they were woken for.
//!
//! ```text
//! ┌─────────────────┐  set()   ┌──────────────┐  wait_for_event()  ┌──────────┐
//! │ request_mode()  │─────────▶│              │───────────────────▶│ External │
//! │ Discovery state │─────────▶│  TaskEvents  │───────────────────▶│ Sensors  │
//! │ Idle supervisor │─────────▶│              │                    │ UI       │
//! └─────────────────┘          └──────────────┘                    └──────────┘
//! ```

use core::ops::{BitOr, BitOrAssign};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Event bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventMask(u32);

impl EventMask {
    pub const NONE: Self = Self(0);
    /// A collaborator asked the FSM to change mode.
    pub const MODE_REQUEST: Self = Self(1 << 0);
    /// External device info was updated by discovery.
    pub const DEVICE_INFO_CHANGED: Self = Self(1 << 1);
    /// The idle supervisor asked for a shutdown.
    pub const IDLE_SHUTDOWN: Self = Self(1 << 2);
    pub const ALL: Self = Self(0b111);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for EventMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[derive(Default)]
pub struct TaskEvents {
    flags: Mutex<EventMask>,
    raised: Condvar,
}

impl TaskEvents {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, EventMask> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raise `mask` and wake all waiters.
    pub fn set(&self, mask: EventMask) {
        *self.lock() |= mask;
        self.raised.notify_all();
    }

    pub fn clear(&self, mask: EventMask) {
        let mut flags = self.lock();
        *flags = EventMask(flags.0 & !mask.0);
    }

    /// Currently pending bits, without consuming them.
    pub fn pending(&self) -> EventMask {
        *self.lock()
    }

    /// Block until any bit of `mask` is raised or `timeout` expires.
    ///
    /// Returns the bits of `mask` that were pending and clears them; an empty
    /// mask means the wait timed out.
    pub fn wait_for_event(&self, mask: EventMask, timeout: Duration) -> EventMask {
        let flags = self.lock();
        let (mut flags, _) = self
            .raised
            .wait_timeout_while(flags, timeout, |f| !f.intersects(mask))
            .unwrap_or_else(PoisonError::into_inner);
        let hit = EventMask(flags.0 & mask.0);
        *flags = EventMask(flags.0 & !mask.0);
        hit
    }
}
