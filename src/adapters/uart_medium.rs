//! UART-backed [`Medium`] for ESP-IDF.
//!
//! Serves RS-232, the OWI line and the Bluetooth module's UART bridge.
//! Lines are assembled byte by byte so a `receive_string` that times out
//! mid-line keeps the partial input for the next call.

use esp_idf_hal::delay::TickType;
use esp_idf_hal::uart::UartDriver;
use log::warn;

use crate::comms::medium::{Medium, RX_LINE_CAP, RxLine};
use crate::error::MediumError;

/// Size of the driver's TX ring buffer.
const TX_BUFFER_LEN: usize = 256;

pub struct UartMedium {
    uart: UartDriver<'static>,
    partial: RxLine,
}

impl UartMedium {
    pub fn new(uart: UartDriver<'static>) -> Self {
        Self {
            uart,
            partial: RxLine::new(),
        }
    }

    fn ticks(timeout_ms: u32) -> u32 {
        TickType::new_millis(u64::from(timeout_ms)).ticks()
    }
}

impl Medium for UartMedium {
    fn send_string(&mut self, line: &str, timeout_ms: u32) -> Result<(), MediumError> {
        self.write(line.as_bytes(), timeout_ms)
    }

    fn receive_string(&mut self, timeout_ms: u32) -> Result<RxLine, MediumError> {
        let ticks = Self::ticks(timeout_ms);
        let mut byte = [0u8; 1];
        loop {
            match self.uart.read(&mut byte, ticks) {
                Ok(0) => return Err(MediumError::Timeout),
                Ok(_) => {}
                Err(e) => {
                    warn!("uart rx: {e}");
                    return Err(MediumError::Hardware);
                }
            }
            let c = char::from(byte[0]);
            if !c.is_ascii() {
                continue;
            }
            if self.partial.push(c).is_err() {
                self.partial.clear();
                return Err(MediumError::Overflow);
            }
            if c == '\n' {
                return Ok(core::mem::take(&mut self.partial));
            }
            if self.partial.len() == RX_LINE_CAP {
                self.partial.clear();
                return Err(MediumError::Overflow);
            }
        }
    }

    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, MediumError> {
        match self.uart.read(buf, Self::ticks(timeout_ms)) {
            Ok(0) => Err(MediumError::Timeout),
            Ok(n) => Ok(n),
            Err(e) => {
                warn!("uart rx: {e}");
                Err(MediumError::Hardware)
            }
        }
    }

    fn write(&mut self, data: &[u8], timeout_ms: u32) -> Result<(), MediumError> {
        let mut rest = data;
        while !rest.is_empty() {
            match self.uart.write(rest) {
                Ok(n) => rest = &rest[n..],
                Err(e) => {
                    warn!("uart tx: {e}");
                    return Err(MediumError::Hardware);
                }
            }
        }
        self.uart
            .wait_tx_done(Self::ticks(timeout_ms))
            .map_err(|_| MediumError::Timeout)
    }

    fn clear_rx_buffer(&mut self) {
        self.partial.clear();
        if let Err(e) = self.uart.clear_rx() {
            warn!("uart clear: {e}");
        }
    }

    fn tx_capacity(&self) -> usize {
        TX_BUFFER_LEN
    }
}
