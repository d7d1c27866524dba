//! Script compiler and cooperative interpreter for a real-time audio looper.
//!
//! The [`engine`] module defines what the scripting layer needs from the
//! audio engine; [`script`] holds the language itself.  [`sim`] and
//! [`worker`] let scripts run headlessly from the `mscript` binary and the
//! test suites.

pub mod cli;
pub mod config;
pub mod engine;
pub mod script;
pub mod sim;
pub mod worker;
