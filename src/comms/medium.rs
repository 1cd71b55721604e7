//! Transport medium abstraction: line and byte I/O over one physical link.
//!
//! Concrete implementations:
//! - USB-CDC and UART (RS-232, OWI) on ESP-IDF, see `adapters::uart_medium`
//! - Bluetooth UART bridge (same driver, different port)
//! - [`ScriptedMedium`](super::fake::ScriptedMedium) for host tests
//!
//! Comms states are written against `Medium` only, so adding a transport
//! needs no changes to the protocol logic.

use std::sync::{Arc, Mutex, PoisonError};

use heapless::String;

use crate::error::MediumError;
use crate::protocol::duci::TX_LINE_CAP;

/// Longest line a medium will hand back from `receive_string`.
pub const RX_LINE_CAP: usize = TX_LINE_CAP;

/// One received line, terminator included.
pub type RxLine = String<RX_LINE_CAP>;

/// Blocking line/byte transport.
pub trait Medium {
    /// Send a complete framed line.
    fn send_string(&mut self, line: &str, timeout_ms: u32) -> Result<(), MediumError>;

    /// Block until one line (up to and including LF) arrives or the timeout
    /// expires.
    fn receive_string(&mut self, timeout_ms: u32) -> Result<RxLine, MediumError>;

    /// Read up to `buf.len()` bytes.  Returns the number read; `Timeout` when
    /// nothing arrived at all.
    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, MediumError>;

    /// Write raw bytes.
    fn write(&mut self, data: &[u8], timeout_ms: u32) -> Result<(), MediumError>;

    /// Discard any partially received input.
    fn clear_rx_buffer(&mut self);

    /// Size of the outgoing buffer in bytes.
    fn tx_capacity(&self) -> usize;

    /// Physical link state (cable present, BLE connected).
    fn is_connected(&self) -> bool {
        true
    }

    /// Send a line and wait for the answering line.
    fn query(&mut self, line: &str, timeout_ms: u32) -> Result<RxLine, MediumError> {
        self.clear_rx_buffer();
        self.send_string(line, timeout_ms)?;
        self.receive_string(timeout_ms)
    }
}

/// A medium shared between its comms task and a client that has grabbed it.
pub type SharedMedium = Arc<Mutex<dyn Medium + Send>>;

/// Wrap a concrete medium for sharing.
pub fn shared<M: Medium + Send + 'static>(medium: M) -> SharedMedium {
    Arc::new(Mutex::new(medium))
}

/// Run `f` with the medium locked.  A poisoned lock is recovered: the medium
/// holds no invariants a panicking user could have broken.
pub fn with_medium<R>(medium: &SharedMedium, f: impl FnOnce(&mut (dyn Medium + Send)) -> R) -> R {
    let mut guard = medium.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut *guard)
}

/// A medium that is never connected: sends are discarded, receives time out.
/// Used for transports with no hardware fitted.
pub struct NullMedium;

impl Medium for NullMedium {
    fn send_string(&mut self, _line: &str, _timeout_ms: u32) -> Result<(), MediumError> {
        Ok(())
    }

    fn receive_string(&mut self, timeout_ms: u32) -> Result<RxLine, MediumError> {
        std::thread::sleep(std::time::Duration::from_millis(u64::from(timeout_ms)));
        Err(MediumError::Timeout)
    }

    fn read(&mut self, _buf: &mut [u8], timeout_ms: u32) -> Result<usize, MediumError> {
        std::thread::sleep(std::time::Duration::from_millis(u64::from(timeout_ms)));
        Err(MediumError::Timeout)
    }

    fn write(&mut self, _data: &[u8], _timeout_ms: u32) -> Result<(), MediumError> {
        Ok(())
    }

    fn clear_rx_buffer(&mut self) {}

    fn tx_capacity(&self) -> usize {
        0
    }

    fn is_connected(&self) -> bool {
        false
    }
}
