//! Collaborator boundary.
//!
//! The comms stack drives the instrument only through the **port traits** in
//! [`ports`], so every state and command handler is testable on the host with
//! mock adapters.

pub mod ports;
