//! Configuration module for the Vantage runtime
//!
//! `VantageConfig` is read from `vantage.toml` (or an explicit path) and
//! passed explicitly to every component that needs it.

pub mod types;

pub use types::*;
