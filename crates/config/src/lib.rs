//! Configuration module for the transcode worker agent
//!
//! Handles loading settings from a TOML file with environment variable overrides.

pub mod config;

pub use config::*;
