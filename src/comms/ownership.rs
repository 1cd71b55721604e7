//! Comms ownership handshake.
//!
//! Lets another subsystem borrow a transport from its run loop without
//! tearing the state machine down:
//!
//! ```text
//!   Owned ──suspend()──▶ Requested ──checkpoint()──▶ Relinquished
//!     ▲                      │                            │
//!     └──── timeout ─────────┘                            │
//!     └──────────────────── resume() ─────────────────────┘
//! ```
//!
//! `suspend()` blocks until the run loop reaches its next `checkpoint()` and
//! hands over, or until the timeout expires.  The run loop then blocks inside
//! `checkpoint()` until `resume()`.  Every transition happens under one mutex,
//! so there is no window between observing `Requested` and setting
//! `Relinquished`.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipState {
    Owned,
    Requested,
    Relinquished,
}

pub struct Ownership {
    state: Mutex<OwnershipState>,
    changed: Condvar,
}

impl Ownership {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(OwnershipState::Owned),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, OwnershipState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> OwnershipState {
        *self.lock()
    }

    /// Ask the run loop to hand over.  Returns `true` once it has; `false` if
    /// the link is already lent out or the run loop did not answer in time, in
    /// which case ownership reverts to `Owned`.
    pub fn suspend(&self, timeout: Duration) -> bool {
        let mut state = self.lock();
        if *state != OwnershipState::Owned {
            return false;
        }
        *state = OwnershipState::Requested;
        self.changed.notify_all();

        let (mut state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |s| *s == OwnershipState::Requested)
            .unwrap_or_else(PoisonError::into_inner);
        match *state {
            OwnershipState::Relinquished => true,
            OwnershipState::Requested => {
                warn!("Ownership: run loop did not relinquish within {timeout:?}");
                *state = OwnershipState::Owned;
                self.changed.notify_all();
                false
            }
            OwnershipState::Owned => false,
        }
    }

    /// Hand the link back to the run loop.
    pub fn resume(&self) {
        let mut state = self.lock();
        *state = OwnershipState::Owned;
        self.changed.notify_all();
    }

    /// Run-loop side: if a handover was requested, relinquish and block until
    /// resumed.  Returns whether the loop was parked.
    pub fn checkpoint(&self) -> bool {
        let mut state = self.lock();
        if *state != OwnershipState::Requested {
            return false;
        }
        *state = OwnershipState::Relinquished;
        self.changed.notify_all();
        let _state = self
            .changed
            .wait_while(state, |s| *s != OwnershipState::Owned)
            .unwrap_or_else(PoisonError::into_inner);
        true
    }
}

impl Default for Ownership {
    fn default() -> Self {
        Self::new()
    }
}
