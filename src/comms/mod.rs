//! Transport plumbing underneath the comms states.
//!
//! - [`medium`]: the `Medium` I/O trait every transport implements
//! - [`ownership`]: borrow a transport from its run loop
//! - [`device_info`]: what discovery learned about the far end
//! - [`fake`]: scripted medium for host tests and simulation

pub mod device_info;
pub mod fake;
pub mod medium;
pub mod ownership;

pub use medium::{Medium, SharedMedium};
