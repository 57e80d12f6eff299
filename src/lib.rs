//! ArbScope Backend Library
//!
//! Exposes the arbitrage analytics engine and wire models for use by the
//! server binary, the CLI adapter, and integration tests.

pub mod engine;
pub mod models;

pub use engine::{CancellationToken, EngineContext, EngineError, ScanOptions, ScanReport};
