//! Identity of the device on the far end of a serial link.
//!
//! Written by device discovery, read by the instrument layer through
//! [`CommsTask::connected_device_info`](crate::task::CommsTask::connected_device_info).

use core::cell::Cell;
use core::fmt;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use serde::{Deserialize, Serialize};

/// Device-kind codes discovery will accept.
pub const SUPPORTED_DEVICE_KINDS: [u16; 3] = [472, 478, 499];

pub fn is_supported_kind(kind: u16) -> bool {
    SUPPORTED_DEVICE_KINDS.contains(&kind)
}

/// Firmware version triple, `Vmm.nn.bb` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub build: u16,
}

impl Version {
    pub const fn new(major: u8, minor: u8, build: u16) -> Self {
        Self {
            major,
            minor,
            build,
        }
    }

    /// Parse `Vmm.nn.bb`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.strip_prefix('V')?.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let build = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(major, minor, build))
    }

    /// Big-endian OWI encoding: major, minor, build (u16).
    pub fn to_be_bytes(self) -> [u8; 4] {
        let [hi, lo] = self.build.to_be_bytes();
        [self.major, self.minor, hi, lo]
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{:02}.{:02}.{:02}", self.major, self.minor, self.build)
    }
}

/// Device kind and application version, as reported by `RI?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub kind: u16,
    pub version: Version,
}

impl DeviceIdentity {
    /// Parse the two `RI` reply fields: `DKnnnn` and `Vmm.nn.bb`.
    pub fn parse(kind: &str, version: &str) -> Option<Self> {
        let digits = kind.strip_prefix("DK")?;
        if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            kind: digits.parse().ok()?,
            version: Version::parse(version)?,
        })
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DK{:04},{}", self.kind, self.version)
    }
}

/// Connection state of an externally attached device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExternalDeviceInfo {
    pub connected: bool,
    pub supported: bool,
    pub identified: bool,
    pub identity: DeviceIdentity,
    pub serial_number: u32,
}

/// Mutex-guarded device info cell shared between a comms task and readers.
pub struct SharedDeviceInfo {
    inner: Mutex<CriticalSectionRawMutex, Cell<ExternalDeviceInfo>>,
}

impl SharedDeviceInfo {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Cell::new(ExternalDeviceInfo {
                connected: false,
                supported: false,
                identified: false,
                identity: DeviceIdentity {
                    kind: 0,
                    version: Version::new(0, 0, 0),
                },
                serial_number: 0,
            })),
        }
    }

    pub fn get(&self) -> ExternalDeviceInfo {
        self.inner.lock(Cell::get)
    }

    pub fn set(&self, info: ExternalDeviceInfo) {
        self.inner.lock(|c| c.set(info));
    }

    pub fn clear(&self) {
        self.set(ExternalDeviceInfo::default());
    }

    /// Read-modify-write under a single lock.
    pub fn update(&self, f: impl FnOnce(&mut ExternalDeviceInfo)) {
        self.inner.lock(|c| {
            let mut info = c.get();
            f(&mut info);
            c.set(info);
        });
    }
}

impl Default for SharedDeviceInfo {
    fn default() -> Self {
        Self::new()
    }
}
