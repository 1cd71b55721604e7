//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that drives one area of the comms stack
//! through a real comms task thread, a `ScriptedMedium` wire and mock
//! collaborators.  All tests run on the host with no hardware required.

mod discovery_tests;
mod duci_session_tests;
mod idle_tests;
mod mock_instrument;
mod owi_tests;
mod ownership_tests;
mod remote_tests;
mod rig;
