//! Platform helpers below the comms stack.

pub mod task_pin;
