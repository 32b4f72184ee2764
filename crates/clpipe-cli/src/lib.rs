//! clpipe CLI library
//!
//! Exposes the argument, output and exit-code modules for testing.

pub mod args;
pub mod exit;
pub mod output;
