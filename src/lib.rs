//! FieldCal comms library.
//!
//! Command protocol engine (DUCI text, OWI binary) and the per-transport
//! comms state machines.  Everything except `adapters::uart_medium` builds
//! on the host for tests, fuzzing and simulation; ESP-IDF code sits behind
//! the `espidf` feature.

#![deny(unused_must_use)]

pub mod app;
pub mod comms;
pub mod config;
pub mod error;
pub mod events;
pub mod fsm;
pub mod protocol;
pub mod task;

pub mod adapters;
pub mod drivers;
