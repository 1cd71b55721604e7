//! FieldCal Comms - Main Entry Point
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  UartMedium ×3 (RS-232, OWI, BT bridge)   UsbSerial (console)  │
//! │  LogInstrument (Instrument + FileStore)                        │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │  CommsTask ×4  ──▶  CommsFsm  ──▶  DUCI / OWI parsers  │    │
//! │  │           shared RemoteState (one bound transport)     │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```

// ── Imports ───────────────────────────────────────────────────
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use esp_idf_hal::gpio::AnyIOPin;
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::uart::{UartDriver, config::Config as UartConfig};
use esp_idf_hal::units::Hertz;
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use log::{info, warn};

use fieldcal_comms::adapters::log_instrument::{LogFileStore, LogInstrument};
use fieldcal_comms::adapters::uart_medium::UartMedium;
use fieldcal_comms::app::ports::Collaborators;
use fieldcal_comms::comms::device_info::Version;
use fieldcal_comms::comms::medium::{NullMedium, shared};
use fieldcal_comms::config::{CommsConfig, MAX_BLOB_LEN};
use fieldcal_comms::fsm::TransportKind;
use fieldcal_comms::fsm::remote::RemoteState;
use fieldcal_comms::task::CommsTask;

const APP_VERSION: Version = Version::new(1, 4, 12);
const BOOT_VERSION: Version = Version::new(1, 0, 3);

const NVS_NAMESPACE: &str = "comms";
const NVS_CONFIG_KEY: &str = "cfg";

const RS232_BAUD: u32 = 115_200;
const OWI_BAUD: u32 = 19_200;
const BT_BAUD: u32 = 115_200;

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  FieldCal comms v{}                ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Collaborators ──────────────────────────────────────
    let nvs = EspNvs::new(EspDefaultNvsPartition::take()?, NVS_NAMESPACE, true)?;
    let config = load_config(&nvs);
    let instrument = Arc::new(LogInstrument::new(APP_VERSION, BOOT_VERSION));
    let collab = Collaborators {
        instrument,
        store: Arc::new(LogFileStore),
    };
    let remote = Arc::new(RemoteState::new().context("building Remote command table")?);

    // ── 3. Mediums ────────────────────────────────────────────
    let p = Peripherals::take().context("peripherals already taken")?;
    let rs232 = UartDriver::new(
        p.uart1,
        p.pins.gpio17,
        p.pins.gpio18,
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &UartConfig::new().baudrate(Hertz(RS232_BAUD)),
    )?;
    let owi = UartDriver::new(
        p.uart2,
        p.pins.gpio4,
        p.pins.gpio5,
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &UartConfig::new().baudrate(Hertz(OWI_BAUD)),
    )?;
    let bt = UartDriver::new(
        p.uart0,
        p.pins.gpio43,
        p.pins.gpio44,
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &UartConfig::new().baudrate(Hertz(BT_BAUD)),
    )?;

    // ── 4. Comms tasks ────────────────────────────────────────
    // USB-CDC is brought up by the console driver; until it is wired to a
    // medium the USB task runs against a disconnected link.
    let tasks = [
        (TransportKind::Usb, shared(NullMedium), "comms-usb\0"),
        (TransportKind::Bluetooth, shared(UartMedium::new(bt)), "comms-bt\0"),
        (TransportKind::Serial, shared(UartMedium::new(rs232)), "comms-serial\0"),
        (TransportKind::Owi, shared(UartMedium::new(owi)), "comms-owi\0"),
    ];
    let mut handles = Vec::with_capacity(tasks.len());
    for (transport, medium, name) in tasks {
        let task = CommsTask::initialise(transport, config.clone(), medium, collab.clone(), remote.clone());
        let handle = task
            .spawn(name)
            .with_context(|| format!("spawning {transport} comms task"))?;
        handles.push((task, handle));
    }
    info!("All comms tasks running");

    // ── 5. Supervise ──────────────────────────────────────────
    loop {
        std::thread::sleep(Duration::from_secs(10));
        for (task, handle) in &handles {
            if handle.is_finished() {
                log::error!("{} comms task exited", task.transport());
            }
        }
    }
}

/// Stored comms settings, or the defaults when none are stored or the blob
/// does not validate.
fn load_config(nvs: &EspNvs<NvsDefault>) -> CommsConfig {
    let mut buf = [0u8; MAX_BLOB_LEN];
    match nvs.get_raw(NVS_CONFIG_KEY, &mut buf) {
        Ok(Some(blob)) => match CommsConfig::from_bytes(blob) {
            Ok(config) => {
                info!("Comms config loaded from NVS ({} bytes)", blob.len());
                config
            }
            Err(e) => {
                warn!("Stored comms config rejected ({e}), using defaults");
                CommsConfig::default()
            }
        },
        Ok(None) => {
            info!("No stored comms config, using defaults");
            CommsConfig::default()
        }
        Err(e) => {
            warn!("NVS read error {e}, using defaults");
            CommsConfig::default()
        }
    }
}
