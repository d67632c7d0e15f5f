//! Core functionality for PcrBind, offline PCR-bound device fingerprinting.
//!
//! This crate provides the parameter set, the measurement data model and the
//! logging setup shared by the crypto and identity crates.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{
    Config, LogFormat, LoggingConfig, MeasurementConfig, MeasurementMode, ProtocolConfig,
    StorageConfig, KEY_LEN, MIN_NONCE_LEN, SIMULATOR_SEED_LEN,
};
pub use error::{CoreError, Error, Result};
pub use types::{current_timestamp_ms, MeasurementSet, PcrIndex, PCR_BANK_SIZE};
