//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises the session against mock
//! adapters or the in-process device emulator. Nothing here needs a radio.

mod mock_transport;
mod security_tests;
mod session_flow_tests;
