//! System-wide default constants.
//!
//! Centralises the policy numbers the engine ships with. Every value here is
//! the serde default of a field in `EngineConfig` and can be overridden in
//! `batch_config.toml`.

// ============================================================================
// Deployment
// ============================================================================

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "CUSTODY_BATCH_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "batch_config.toml";

/// Default HTTP bind address.
pub const SERVER_ADDR: &str = "0.0.0.0:8080";

/// Default data directory for the sled database.
pub const DATA_DIR: &str = "./data";

// ============================================================================
// Calculation
// ============================================================================

/// Standard reference temperature (°C).
pub const REFERENCE_TEMPERATURE_C: f64 = 15.0;

/// Simplified volumetric expansion coefficient (1/°C).
pub const THERMAL_EXPANSION_COEFFICIENT: f64 = 0.0006;

/// API gravity assumed for a tank with no configured base.
pub const DEFAULT_API_GRAVITY: f64 = 35.0;

// ============================================================================
// Gauge Capture
// ============================================================================

/// Telemetry older than this is flagged `source_reliable = false` (seconds).
pub const TELEMETRY_FRESHNESS_SECS: i64 = 60;

/// Default half-window for historical capture (seconds).
pub const HISTORICAL_TOLERANCE_SECS: i64 = 300;

/// Default timeout for a capture operation (seconds).
pub const CAPTURE_TIMEOUT_SECS: u64 = 15;

// ============================================================================
// Recalculation
// ============================================================================

/// |% change| of transferred NSV above which approval is required.
pub const APPROVAL_PERCENTAGE_THRESHOLD: f64 = 0.5;

/// |mass difference| (kg) above which approval is required.
pub const APPROVAL_MASS_THRESHOLD_KG: f64 = 100.0;

// ============================================================================
// Movement Detection
// ============================================================================

/// Level samples kept per tank.
pub const MOVEMENT_BUFFER_SIZE: usize = 5;

/// Level poll cadence (seconds).
pub const MOVEMENT_POLL_INTERVAL_SECS: u64 = 10;

/// |rate| below this classifies as idle (mm/h).
pub const IDLE_THRESHOLD_MM_PER_HOUR: f64 = 5.0;

/// Minimum confidence for surfacing a batch suggestion.
pub const MIN_SUGGESTION_CONFIDENCE: f64 = 0.6;

/// Suggestion suppression after dismiss/accept (seconds). 300 = 5 min.
pub const SUGGESTION_COOLDOWN_SECS: u64 = 300;

// ============================================================================
// Lab Reconciliation
// ============================================================================

/// Coarse volume factor used for the barrel-impact heuristic.
pub const BARREL_IMPACT_FACTOR: f64 = 0.01;
