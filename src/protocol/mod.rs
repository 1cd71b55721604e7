//! Command protocol engine.
//!
//! - [`duci`]: line-oriented text protocol (`#KM=R`, `!SN=1234`)
//! - [`owi`]: opcode/length-framed binary protocol
//!
//! Both report failures through the [`errors::ErrorFlags`] bitfield and never
//! invoke a handler for malformed input.

pub mod args;
pub mod duci;
pub mod errors;
pub mod owi;
pub mod pin;

pub use errors::ErrorFlags;
pub use pin::PinMode;
