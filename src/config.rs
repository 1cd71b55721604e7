//! Comms configuration parameters
//!
//! Timing and framing knobs shared by every transport task.
//! Values can be overridden from persistent storage by the instrument layer.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Upper bound on a stored config blob.
pub const MAX_BLOB_LEN: usize = 64;

/// Line terminator appended to outgoing DUCI messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineTerminator {
    Lf,
    CrLf,
}

impl LineTerminator {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
        }
    }
}

/// Core comms configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommsConfig {
    // --- Receive loop ---
    /// Bounded receive timeout for one command line (milliseconds)
    pub command_timeout_ms: u32,
    /// Sleep while the system is not in run mode (milliseconds)
    pub not_run_sleep_ms: u32,
    /// Idle time before the device shutdown hook fires (seconds, 0 = never)
    pub auto_power_off_secs: u32,

    // --- Ownership handover ---
    /// How long `suspend()` waits for the run loop to relinquish (milliseconds)
    pub suspend_timeout_ms: u32,

    // --- Device discovery ---
    /// Cadence of identity / serial-number probes (milliseconds)
    pub discovery_interval_ms: u32,
    /// Reply timeout for one discovery probe (milliseconds)
    pub discovery_reply_timeout_ms: u32,
    /// Consecutive idle receive timeouts in serial Local before probing
    pub discovery_idle_limit: u32,

    // --- Link supervision ---
    /// Consecutive disconnected polls before Remote falls back to Local
    pub disconnect_limit: u32,

    // --- Framing ---
    /// Require and emit `:nn` checksums on DUCI lines
    pub checksum_enabled: bool,
    /// Terminator appended to outgoing DUCI lines
    pub line_terminator: LineTerminator,
}

impl CommsConfig {
    /// Number of consecutive receive timeouts that amount to the configured
    /// auto power-off time.  `None` when auto power-off is disabled.
    pub fn idle_timeout_limit(&self) -> Option<u32> {
        if self.auto_power_off_secs == 0 || self.command_timeout_ms == 0 {
            return None;
        }
        let limit = (u64::from(self.auto_power_off_secs) * 1000) / u64::from(self.command_timeout_ms);
        Some(limit.clamp(1, u64::from(u32::MAX)) as u32)
    }

    /// Reject settings the comms loops cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(10..=10_000).contains(&self.command_timeout_ms) {
            return Err(Error::Config("command_timeout_ms must be 10-10000"));
        }
        if self.suspend_timeout_ms <= self.command_timeout_ms {
            return Err(Error::Config("suspend_timeout_ms must exceed command_timeout_ms"));
        }
        if self.discovery_reply_timeout_ms == 0 {
            return Err(Error::Config("discovery_reply_timeout_ms must be non-zero"));
        }
        if self.disconnect_limit == 0 {
            return Err(Error::Config("disconnect_limit must be non-zero"));
        }
        Ok(())
    }

    /// Decode and validate a blob written by [`CommsConfig::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let config: Self = postcard::from_bytes(bytes).map_err(|_| Error::Config("corrupted blob"))?;
        config.validate()?;
        Ok(config)
    }

    /// Encode for persistent storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.validate()?;
        let bytes = postcard::to_allocvec(self).map_err(|_| Error::Config("encode failed"))?;
        if bytes.len() > MAX_BLOB_LEN {
            return Err(Error::Config("blob too large"));
        }
        Ok(bytes)
    }
}

impl Default for CommsConfig {
    fn default() -> Self {
        Self {
            // Receive loop
            command_timeout_ms: 500,
            not_run_sleep_ms: 100,
            auto_power_off_secs: 600, // 10 min

            // Ownership
            suspend_timeout_ms: 2000,

            // Discovery
            discovery_interval_ms: 500,
            discovery_reply_timeout_ms: 250,
            discovery_idle_limit: 4,

            // Link
            disconnect_limit: 3,

            // Framing
            checksum_enabled: false,
            line_terminator: LineTerminator::Lf,
        }
    }
}
