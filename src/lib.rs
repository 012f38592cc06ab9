//! valuescan: value-bet odds scanner and alert engine.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod cache;
pub mod clv;
pub mod config;
pub mod engine;
pub mod notifier;
pub mod provider;
pub mod staking;
pub mod storage;
pub mod strategy;
pub mod types;
