//! # Strata Application Library
//!
//! CLI and configuration layer of the `strata` binary, exposed as a library
//! so integration tests can drive commands without spawning a process.

pub mod cli;
pub mod config;
