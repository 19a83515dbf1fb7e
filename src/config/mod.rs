//! Configuration management
//!
//! Network difficulty, POW workers, address defaults, object lifetimes and
//! retry queue settings. Loaded from TOML with environment overrides and
//! handed to the pipelines explicitly.

pub mod settings;

pub use settings::Config;
