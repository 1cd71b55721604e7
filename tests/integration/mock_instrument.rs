//! Mock instrument and file store for integration tests.
//!
//! Records every side effect so tests can assert on what the comms stack
//! asked the instrument to do.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use fieldcal_comms::app::ports::{DumpLine, FileStore, Instrument, StoreError};
use fieldcal_comms::comms::device_info::Version;
use fieldcal_comms::error::SystemErrorCode;
use fieldcal_comms::protocol::ErrorFlags;
use fieldcal_comms::protocol::PinMode;
use fieldcal_comms::protocol::args::{Date, Time};

// ── MockInstrument ────────────────────────────────────────────

pub struct MockInstrument {
    pub run_mode: AtomicBool,
    pub shutdowns: AtomicU32,
    pub system_errors: Mutex<Vec<SystemErrorCode>>,
    pub pin: Mutex<PinMode>,
    pub serial: AtomicU32,
    pub setpoint: Mutex<f32>,
    pub zero: Mutex<f32>,
    pub date: Mutex<Option<Date>>,
    pub time: Mutex<Option<Time>>,
    pub self_tests: Mutex<Vec<u32>>,
    pub motor: AtomicI32,
    pub dump: Mutex<Vec<&'static str>>,
}

#[allow(dead_code)]
impl MockInstrument {
    pub fn new() -> Self {
        Self {
            run_mode: AtomicBool::new(true),
            shutdowns: AtomicU32::new(0),
            system_errors: Mutex::new(Vec::new()),
            pin: Mutex::new(PinMode::None),
            serial: AtomicU32::new(12345),
            setpoint: Mutex::new(0.0),
            zero: Mutex::new(0.0),
            date: Mutex::new(None),
            time: Mutex::new(None),
            self_tests: Mutex::new(Vec::new()),
            motor: AtomicI32::new(0),
            dump: Mutex::new(Vec::new()),
        }
    }

    pub fn shutdown_count(&self) -> u32 {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn load_dump(&self, lines: &[&'static str]) {
        let mut dump = self.dump.lock().unwrap();
        dump.clear();
        dump.extend(lines.iter().rev());
    }
}

impl Instrument for MockInstrument {
    fn is_run_mode(&self) -> bool {
        self.run_mode.load(Ordering::SeqCst)
    }

    fn request_shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }

    fn report_system_error(&self, code: SystemErrorCode) {
        self.system_errors.lock().unwrap().push(code);
    }

    fn pin_mode(&self) -> PinMode {
        *self.pin.lock().unwrap()
    }

    fn set_pin_mode(&self, mode: PinMode) {
        *self.pin.lock().unwrap() = mode;
    }

    fn device_kind(&self) -> u16 {
        499
    }

    fn app_version(&self) -> Version {
        Version::new(1, 2, 3)
    }

    fn boot_version(&self) -> Version {
        Version::new(0, 9, 258)
    }

    fn serial_number(&self) -> u32 {
        self.serial.load(Ordering::SeqCst)
    }

    fn set_serial_number(&self, serial: u32) -> Result<(), ErrorFlags> {
        self.serial.store(serial, Ordering::SeqCst);
        Ok(())
    }

    fn reading(&self) -> f32 {
        1.5
    }

    fn setpoint(&self) -> f32 {
        *self.setpoint.lock().unwrap()
    }

    fn set_setpoint(&self, value: f32) -> Result<(), ErrorFlags> {
        *self.setpoint.lock().unwrap() = value;
        Ok(())
    }

    fn zero_offset(&self) -> f32 {
        *self.zero.lock().unwrap()
    }

    fn set_zero_offset(&self, value: f32) -> Result<(), ErrorFlags> {
        *self.zero.lock().unwrap() = value;
        Ok(())
    }

    fn status(&self) -> u32 {
        0x0000_00A5
    }

    fn date(&self) -> Date {
        self.date.lock().unwrap().unwrap_or(Date {
            day: 1,
            month: 1,
            year: 2000,
        })
    }

    fn set_date(&self, date: Date) -> Result<(), ErrorFlags> {
        *self.date.lock().unwrap() = Some(date);
        Ok(())
    }

    fn time(&self) -> Time {
        self.time.lock().unwrap().unwrap_or(Time {
            hour: 0,
            minute: 0,
            second: 0,
        })
    }

    fn set_time(&self, time: Time) -> Result<(), ErrorFlags> {
        *self.time.lock().unwrap() = Some(time);
        Ok(())
    }

    fn run_self_test(&self, test: u32) -> Result<(), ErrorFlags> {
        self.self_tests.lock().unwrap().push(test);
        Ok(())
    }

    fn self_test_status(&self) -> u32 {
        0xC0FF_EE00
    }

    fn engineering_adc(&self) -> i32 {
        -42
    }

    fn motor_percent(&self) -> i32 {
        self.motor.load(Ordering::SeqCst)
    }

    fn set_motor_percent(&self, percent: i32) -> Result<(), ErrorFlags> {
        self.motor.store(percent, Ordering::SeqCst);
        Ok(())
    }

    fn next_dump_line(&self) -> Option<DumpLine> {
        let line = self.dump.lock().unwrap().pop()?;
        DumpLine::try_from(line).ok()
    }
}

// ── MemoryStore ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub filename: String,
    pub sequence: u16,
    pub data: Vec<u8>,
}

pub struct MemoryStore {
    pub chunks: Mutex<Vec<StoredChunk>>,
    pub fail: AtomicBool,
}

#[allow(dead_code)]
impl MemoryStore {
    pub fn new() -> Self {
        Self {
            chunks: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn chunks(&self) -> Vec<StoredChunk> {
        self.chunks.lock().unwrap().clone()
    }
}

impl FileStore for MemoryStore {
    fn write_chunk(&self, filename: &str, sequence: u16, data: &[u8]) -> Result<(), StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Full);
        }
        self.chunks.lock().unwrap().push(StoredChunk {
            filename: filename.to_owned(),
            sequence,
            data: data.to_vec(),
        });
        Ok(())
    }
}
