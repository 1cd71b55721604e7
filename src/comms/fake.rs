//! Scripted in-memory medium for host tests and simulation.
//!
//! Clones share one queue: the test keeps a clone to feed input and inspect
//! output while the comms thread owns another behind a [`SharedMedium`].
//!
//! [`SharedMedium`]: super::medium::SharedMedium

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::MediumError;

use super::medium::{Medium, RxLine};

enum Inbound {
    Data(Vec<u8>),
    Fail(MediumError),
}

#[derive(Default)]
struct Script {
    inbound: VecDeque<Inbound>,
    /// Bytes of a partially consumed inbound item.
    pending: Vec<u8>,
    sent: Vec<Vec<u8>>,
    disconnected: bool,
    clears: usize,
}

#[derive(Clone, Default)]
pub struct ScriptedMedium {
    shared: Arc<(Mutex<Script>, Condvar)>,
}

impl ScriptedMedium {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.shared.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, item: Inbound) {
        self.script().inbound.push_back(item);
        self.shared.1.notify_all();
    }

    /// Queue one inbound line (include the terminator).
    pub fn push_line(&self, line: &str) {
        self.push(Inbound::Data(line.as_bytes().to_vec()));
    }

    /// Queue raw inbound bytes.
    pub fn push_bytes(&self, bytes: &[u8]) {
        self.push(Inbound::Data(bytes.to_vec()));
    }

    /// Make the next receive fail with `err` without waiting.
    pub fn push_error(&self, err: MediumError) {
        self.push(Inbound::Fail(err));
    }

    pub fn set_connected(&self, connected: bool) {
        self.script().disconnected = !connected;
        self.shared.1.notify_all();
    }

    /// Everything sent so far, one entry per `send_string` / `write`.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.script().sent.clone()
    }

    /// Sent entries decoded as text.
    pub fn sent_lines(&self) -> Vec<String> {
        self.script()
            .sent
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect()
    }

    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.script().sent)
    }

    /// Inbound items not yet consumed.
    pub fn inbound_len(&self) -> usize {
        self.script().inbound.len()
    }

    pub fn clear_count(&self) -> usize {
        self.script().clears
    }

    /// Block until at least `count` entries have been sent.
    pub fn wait_for_sent(&self, count: usize, timeout: Duration) -> bool {
        let guard = self.script();
        let (guard, _) = self
            .shared
            .1
            .wait_timeout_while(guard, timeout, |s| s.sent.len() < count)
            .unwrap_or_else(PoisonError::into_inner);
        guard.sent.len() >= count
    }

    /// Block until the inbound queue has drained.
    pub fn wait_for_drain(&self, timeout: Duration) -> bool {
        let guard = self.script();
        let (guard, _) = self
            .shared
            .1
            .wait_timeout_while(guard, timeout, |s| !s.inbound.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        guard.inbound.is_empty()
    }

    /// Wait for the next inbound item, up to `timeout_ms`.
    fn next_inbound(&self, timeout_ms: u32) -> Result<Vec<u8>, MediumError> {
        let timeout = Duration::from_millis(u64::from(timeout_ms));
        let guard = self.script();
        let (mut guard, _) = self
            .shared
            .1
            .wait_timeout_while(guard, timeout, |s| s.pending.is_empty() && s.inbound.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        if !guard.pending.is_empty() {
            return Ok(std::mem::take(&mut guard.pending));
        }
        let item = guard.inbound.pop_front();
        self.shared.1.notify_all();
        match item {
            Some(Inbound::Data(bytes)) => Ok(bytes),
            Some(Inbound::Fail(err)) => Err(err),
            None => Err(MediumError::Timeout),
        }
    }

    fn record(&self, bytes: &[u8]) -> Result<(), MediumError> {
        let mut script = self.script();
        if script.disconnected {
            return Err(MediumError::Disconnected);
        }
        script.sent.push(bytes.to_vec());
        drop(script);
        self.shared.1.notify_all();
        Ok(())
    }
}

impl Medium for ScriptedMedium {
    fn send_string(&mut self, line: &str, _timeout_ms: u32) -> Result<(), MediumError> {
        self.record(line.as_bytes())
    }

    fn receive_string(&mut self, timeout_ms: u32) -> Result<RxLine, MediumError> {
        let bytes = self.next_inbound(timeout_ms)?;
        let text = core::str::from_utf8(&bytes).map_err(|_| MediumError::Hardware)?;
        RxLine::try_from(text).map_err(|()| MediumError::Overflow)
    }

    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, MediumError> {
        let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms));
        let mut filled = 0;
        while filled < buf.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let bytes = match self.next_inbound(remaining.as_millis() as u32) {
                Ok(bytes) => bytes,
                Err(MediumError::Timeout) if filled > 0 => break,
                Err(e) => return Err(e),
            };
            let take = bytes.len().min(buf.len() - filled);
            buf[filled..filled + take].copy_from_slice(&bytes[..take]);
            filled += take;
            if take < bytes.len() {
                self.script().pending = bytes[take..].to_vec();
            }
        }
        Ok(filled)
    }

    fn write(&mut self, data: &[u8], _timeout_ms: u32) -> Result<(), MediumError> {
        self.record(data)
    }

    fn clear_rx_buffer(&mut self) {
        let mut script = self.script();
        script.pending.clear();
        script.clears += 1;
    }

    fn tx_capacity(&self) -> usize {
        RxLine::new().capacity()
    }

    fn is_connected(&self) -> bool {
        !self.script().disconnected
    }
}
