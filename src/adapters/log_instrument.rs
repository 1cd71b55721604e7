//! Log-backed instrument adapter.
//!
//! Implements [`Instrument`] and [`FileStore`] with in-memory state and a
//! log line per side effect.  The binary runs the comms stack against this
//! until the pressure-control layer provides the real implementation.

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{debug, error, info, warn};

use crate::app::ports::{DumpLine, FileStore, Instrument, StoreError};
use crate::comms::device_info::Version;
use crate::error::SystemErrorCode;
use crate::protocol::args::{Date, Time};
use crate::protocol::errors::ErrorFlags;
use crate::protocol::pin::PinMode;

type Shared<T> = Mutex<CriticalSectionRawMutex, Cell<T>>;

/// Device kind this firmware reports in `RI`.
pub const DEVICE_KIND: u16 = 472;

const MOTOR_RANGE: core::ops::RangeInclusive<i32> = -100..=100;

pub struct LogInstrument {
    app_version: Version,
    boot_version: Version,
    run_mode: Shared<bool>,
    pin: Shared<PinMode>,
    serial: Shared<u32>,
    setpoint: Shared<f32>,
    zero: Shared<f32>,
    date: Shared<Date>,
    time: Shared<Time>,
    self_test: Shared<u32>,
    motor: Shared<i32>,
    dump_left: Shared<u16>,
}

impl LogInstrument {
    pub fn new(app_version: Version, boot_version: Version) -> Self {
        Self {
            app_version,
            boot_version,
            run_mode: Mutex::new(Cell::new(true)),
            pin: Mutex::new(Cell::new(PinMode::None)),
            serial: Mutex::new(Cell::new(0)),
            setpoint: Mutex::new(Cell::new(0.0)),
            zero: Mutex::new(Cell::new(0.0)),
            date: Mutex::new(Cell::new(Date {
                day: 1,
                month: 1,
                year: 2024,
            })),
            time: Mutex::new(Cell::new(Time {
                hour: 0,
                minute: 0,
                second: 0,
            })),
            self_test: Mutex::new(Cell::new(0)),
            motor: Mutex::new(Cell::new(0)),
            dump_left: Mutex::new(Cell::new(0)),
        }
    }

    pub fn set_run_mode(&self, running: bool) {
        self.run_mode.lock(|c| c.set(running));
    }

    /// Queue `lines` synthetic log records for the next dump.
    pub fn arm_dump(&self, lines: u16) {
        self.dump_left.lock(|c| c.set(lines));
    }
}

impl Instrument for LogInstrument {
    fn is_run_mode(&self) -> bool {
        self.run_mode.lock(Cell::get)
    }

    fn request_shutdown(&self) {
        warn!("INSTR | shutdown requested by idle timeout");
    }

    fn report_system_error(&self, code: SystemErrorCode) {
        error!("INSTR | system error {code}");
    }

    fn pin_mode(&self) -> PinMode {
        self.pin.lock(Cell::get)
    }

    fn set_pin_mode(&self, mode: PinMode) {
        info!("INSTR | pin mode {:?}", mode);
        self.pin.lock(|c| c.set(mode));
    }

    fn device_kind(&self) -> u16 {
        DEVICE_KIND
    }

    fn app_version(&self) -> Version {
        self.app_version
    }

    fn boot_version(&self) -> Version {
        self.boot_version
    }

    fn serial_number(&self) -> u32 {
        self.serial.lock(Cell::get)
    }

    fn set_serial_number(&self, serial: u32) -> Result<(), ErrorFlags> {
        info!("INSTR | serial number {serial}");
        self.serial.lock(|c| c.set(serial));
        Ok(())
    }

    fn reading(&self) -> f32 {
        self.setpoint.lock(Cell::get) - self.zero.lock(Cell::get)
    }

    fn setpoint(&self) -> f32 {
        self.setpoint.lock(Cell::get)
    }

    fn set_setpoint(&self, value: f32) -> Result<(), ErrorFlags> {
        info!("INSTR | setpoint {value}");
        self.setpoint.lock(|c| c.set(value));
        Ok(())
    }

    fn zero_offset(&self) -> f32 {
        self.zero.lock(Cell::get)
    }

    fn set_zero_offset(&self, value: f32) -> Result<(), ErrorFlags> {
        info!("INSTR | zero offset {value}");
        self.zero.lock(|c| c.set(value));
        Ok(())
    }

    fn status(&self) -> u32 {
        u32::from(self.is_run_mode())
    }

    fn date(&self) -> Date {
        self.date.lock(Cell::get)
    }

    fn set_date(&self, date: Date) -> Result<(), ErrorFlags> {
        info!("INSTR | date {date}");
        self.date.lock(|c| c.set(date));
        Ok(())
    }

    fn time(&self) -> Time {
        self.time.lock(Cell::get)
    }

    fn set_time(&self, time: Time) -> Result<(), ErrorFlags> {
        info!("INSTR | time {time}");
        self.time.lock(|c| c.set(time));
        Ok(())
    }

    fn run_self_test(&self, test: u32) -> Result<(), ErrorFlags> {
        info!("INSTR | self-test {test}");
        self.self_test.lock(|c| c.set(test << 16));
        Ok(())
    }

    fn self_test_status(&self) -> u32 {
        self.self_test.lock(Cell::get)
    }

    fn engineering_adc(&self) -> i32 {
        (self.reading() * 1000.0) as i32
    }

    fn motor_percent(&self) -> i32 {
        self.motor.lock(Cell::get)
    }

    fn set_motor_percent(&self, percent: i32) -> Result<(), ErrorFlags> {
        if !MOTOR_RANGE.contains(&percent) {
            return Err(ErrorFlags::INVALID_ARGS);
        }
        info!("INSTR | motor {percent}%");
        self.motor.lock(|c| c.set(percent));
        Ok(())
    }

    fn next_dump_line(&self) -> Option<DumpLine> {
        let left = self.dump_left.lock(|c| {
            let left = c.get();
            c.set(left.saturating_sub(1));
            left
        });
        if left == 0 {
            return None;
        }
        let mut line = DumpLine::new();
        core::fmt::write(&mut line, format_args!("LOG,{left},{:.3}", self.reading())).ok()?;
        Some(line)
    }
}

/// File store that logs chunks and keeps nothing.
#[derive(Debug, Default)]
pub struct LogFileStore;

impl FileStore for LogFileStore {
    fn write_chunk(&self, filename: &str, sequence: u16, data: &[u8]) -> Result<(), StoreError> {
        if filename.is_empty() {
            return Err(StoreError::IoError);
        }
        debug!("STORE | {filename} #{sequence}: {} bytes", data.len());
        Ok(())
    }
}
