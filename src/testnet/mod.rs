//! Test doubles and fixtures
//!
//! In-process transport, low-difficulty configuration and temporary
//! on-disk stores for pipeline tests.

pub mod test_utils;

pub use test_utils::*;
