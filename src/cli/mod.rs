//! Command-line interface
//!
//! Developer commands for inspecting addresses, tags and POW cost.

pub mod commands;

pub use commands::{Command, Opt, OutputFormat};
