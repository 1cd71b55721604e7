//! Adapters: concrete implementations of the comms port traits.
//!
//! | Adapter          | Implements            | Connects to            |
//! |------------------|-----------------------|------------------------|
//! | `log_instrument` | Instrument, FileStore | Serial log output      |
//! | `uart_medium`    | Medium                | ESP-IDF UART driver    |

pub mod log_instrument;
#[cfg(feature = "espidf")]
pub mod uart_medium;
