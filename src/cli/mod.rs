//! CLI Module
//!
//! Provides command-line interface functionality including exit codes for
//! automation and scripted use.

pub mod exit_codes;

pub use exit_codes::{exit_code_description, print_exit_codes, CliResult, ExitCodes};
