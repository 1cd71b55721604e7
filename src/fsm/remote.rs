//! The Remote session, shared by every transport.
//!
//! Only one transport at a time may run Remote.  A transport binds the
//! session by claiming it; the claim is a guard that unbinds on drop, so the
//! session is released however the Remote loop exits.  A transport that
//! finds the session already bound falls back to Local.

use core::cell::Cell;
use std::sync::Arc;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{info, warn};

use crate::protocol::duci::{DuciParser, TableError};

use super::commands;
use super::context::{CommsLink, Session};
use super::states::serve;
use super::{Mode, TransportKind};

pub struct RemoteState {
    bound: Mutex<CriticalSectionRawMutex, Cell<Option<TransportKind>>>,
    parser: std::sync::Mutex<DuciParser<Session>>,
}

/// Proof that one transport holds the Remote session.
pub struct RemoteClaim<'a> {
    remote: &'a RemoteState,
    transport: TransportKind,
}

impl RemoteClaim<'_> {
    pub fn transport(&self) -> TransportKind {
        self.transport
    }
}

impl Drop for RemoteClaim<'_> {
    fn drop(&mut self) {
        self.remote.bound.lock(|b| b.set(None));
        info!("Remote: released by {}", self.transport);
    }
}

impl RemoteState {
    pub fn new() -> Result<Self, TableError> {
        Ok(Self {
            bound: Mutex::new(Cell::new(None)),
            parser: std::sync::Mutex::new(commands::remote_table()?),
        })
    }

    /// Bind the session to `transport`.  Fails if any transport holds it.
    pub fn set_comms_medium(&self, transport: TransportKind) -> Option<RemoteClaim<'_>> {
        let claimed = self.bound.lock(|b| {
            if b.get().is_some() {
                return false;
            }
            b.set(Some(transport));
            true
        });
        // A guard is only built for the winner; dropping one unbinds.
        claimed.then(|| RemoteClaim {
            remote: self,
            transport,
        })
    }

    /// The transport currently running Remote, if any.
    pub fn bound_to(&self) -> Option<TransportKind> {
        self.bound.lock(Cell::get)
    }

    pub(super) fn run(&self, link: &Arc<CommsLink>) -> Mode {
        let Some(claim) = self.set_comms_medium(link.transport) else {
            warn!(
                "Remote: {} refused, session held by {}",
                link.transport,
                self.bound_to().map_or("nobody", TransportKind::name)
            );
            return Mode::Local;
        };
        info!("Remote: bound to {}", claim.transport());

        // Only the claim holder reaches here, so the lock is uncontended.
        let mut parser = self
            .parser
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        parser.set_checksum_enabled(link.config.checksum_enabled);
        parser.set_terminator(link.config.line_terminator);
        let next = serve(&parser, Mode::Remote, link, None);
        drop(parser);
        drop(claim);
        next
    }
}
