//! Engine Configuration Module
//!
//! Provides deployment configuration loaded from TOML files: telemetry key
//! mapping, calculation constants, approval policy, movement detection and
//! lab variance thresholds, plus static tank metadata.
//!
//! ## Loading Order
//!
//! 1. `CUSTODY_BATCH_CONFIG` environment variable (path to TOML file)
//! 2. `batch_config.toml` in the current working directory
//! 3. Built-in defaults
//!
//! The binary calls `config::init()` once at startup. Engine components take
//! their own sub-config by value, so library users and tests never need the
//! global.

mod engine_config;
pub mod defaults;

pub use engine_config::*;

use std::sync::OnceLock;

/// Global engine configuration, initialized once at startup.
static ENGINE_CONFIG: OnceLock<EngineConfig> = OnceLock::new();

/// Initialize the global engine configuration.
///
/// A second call is ignored with a warning.
pub fn init(config: EngineConfig) {
    if ENGINE_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
    }
}

/// Get a reference to the global engine configuration.
///
/// Falls back to built-in defaults if `init()` was never called.
pub fn get() -> &'static EngineConfig {
    ENGINE_CONFIG.get_or_init(EngineConfig::default)
}

/// Check whether the config has been initialized.
pub fn is_initialized() -> bool {
    ENGINE_CONFIG.get().is_some()
}
