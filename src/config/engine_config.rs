//! Engine Configuration - every policy threshold as an operator-tunable TOML value
//!
//! Each struct implements `Default` with the values the batch engine ships with,
//! so a deployment without a config file behaves exactly like the documented
//! policy (0.5 % / 100 kg approval gate, 5 mm/h idle band, and so on).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a terminal deployment.
///
/// Load with `EngineConfig::load()` which searches:
/// 1. `$CUSTODY_BATCH_CONFIG` env var
/// 2. `./batch_config.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Record store location
    #[serde(default)]
    pub storage: StorageConfig,

    /// Telemetry endpoint and key mapping
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Volume/mass calculation constants
    #[serde(default)]
    pub calculation: CalculationConfig,

    /// Gauge input plausibility ranges
    #[serde(default)]
    pub validation: ValidationLimits,

    /// Recalculation approval gate
    #[serde(default)]
    pub recalculation: RecalculationPolicy,

    /// Movement detector tuning
    #[serde(default)]
    pub movement: MovementConfig,

    /// Lab variance thresholds
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,

    /// Static tank metadata
    #[serde(default)]
    pub tanks: Vec<TankConfig>,
}

impl EngineConfig {
    /// Load configuration using the standard search order.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(defaults::CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), tanks = config.tanks.len(), "Loaded engine config from {}", defaults::CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from env path, falling back");
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", defaults::CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(defaults::LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(tanks = config.tanks.len(), "Loaded engine config from ./{}", defaults::LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", defaults::LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No batch_config.toml found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config = Self::from_toml_str(&contents)
            .map_err(|e| match e {
                ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
                other => other,
            })?;
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| ConfigError::Parse(PathBuf::from("<inline>"), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Look up a configured tank.
    pub fn tank(&self, tank_id: &str) -> Option<&TankConfig> {
        self.tanks.iter().find(|t| t.id == tank_id)
    }

    /// Validate all values for internal consistency.
    ///
    /// Rules:
    /// - Range minimums must be below maximums
    /// - Approval and variance thresholds must be non-negative
    /// - Buffer sizes and intervals must be non-zero
    /// - Tank ids must be unique and diameters positive
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let v = &self.validation;
        Self::check_range(v.temperature_min_c, v.temperature_max_c, "validation.temperature", &mut errors);
        Self::check_range(v.api_gravity_min, v.api_gravity_max, "validation.api_gravity", &mut errors);
        Self::check_range(v.bsw_min_percent, v.bsw_max_percent, "validation.bsw", &mut errors);

        let c = &self.calculation;
        if !c.reference_temperature_c.is_finite() {
            errors.push("calculation.reference_temperature_c must be finite".to_string());
        }
        if !c.thermal_expansion_coefficient.is_finite() || c.thermal_expansion_coefficient < 0.0 {
            errors.push("calculation.thermal_expansion_coefficient must be >= 0".to_string());
        }

        let r = &self.recalculation;
        Self::check_non_negative(r.max_percentage_change, "recalculation.max_percentage_change", &mut errors);
        Self::check_non_negative(r.max_mass_difference_kg, "recalculation.max_mass_difference_kg", &mut errors);

        let m = &self.movement;
        if m.buffer_size < 2 {
            errors.push(format!("movement.buffer_size must be >= 2 (got {})", m.buffer_size));
        }
        if m.poll_interval_secs == 0 {
            errors.push("movement.poll_interval_secs must be > 0".to_string());
        }
        Self::check_non_negative(m.idle_threshold_mm_per_hour, "movement.idle_threshold_mm_per_hour", &mut errors);
        if !(0.0..=1.0).contains(&m.min_confidence) {
            errors.push(format!("movement.min_confidence must be within [0, 1] (got {})", m.min_confidence));
        }

        let rc = &self.reconciliation;
        Self::check_non_negative(rc.api_gravity_threshold, "reconciliation.api_gravity_threshold", &mut errors);
        Self::check_non_negative(rc.temperature_threshold_c, "reconciliation.temperature_threshold_c", &mut errors);
        Self::check_non_negative(rc.bsw_threshold_percent, "reconciliation.bsw_threshold_percent", &mut errors);
        Self::check_non_negative(rc.percentage_threshold, "reconciliation.percentage_threshold", &mut errors);

        if self.telemetry.temperature_keys.is_empty() {
            errors.push("telemetry.temperature_keys must list at least one channel".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for tank in &self.tanks {
            if !seen.insert(tank.id.as_str()) {
                errors.push(format!("tanks: duplicate tank id '{}'", tank.id));
            }
            if !(tank.diameter_m.is_finite() && tank.diameter_m > 0.0) {
                errors.push(format!("tanks.{}: diameter_m must be > 0 (got {})", tank.id, tank.diameter_m));
            }
            if let Some(max) = tank.max_level_mm {
                if !(max.is_finite() && max > 0.0) {
                    errors.push(format!("tanks.{}: max_level_mm must be > 0", tank.id));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_range(min: f64, max: f64, name: &str, errors: &mut Vec<String>) {
        if !min.is_finite() || !max.is_finite() {
            errors.push(format!("{name}: values must be finite (got min={min}, max={max})"));
            return;
        }
        if min >= max {
            errors.push(format!("{name}: min ({min:.3}) must be < max ({max:.3})"));
        }
    }

    fn check_non_negative(value: f64, name: &str, errors: &mut Vec<String>) {
        if !value.is_finite() || value < 0.0 {
            errors.push(format!("{name} must be a finite value >= 0 (got {value})"));
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {}", .0.display(), .1)]
    Io(PathBuf, std::io::Error),
    #[error("Config parse error ({}): {}", .0.display(), .1)]
    Parse(PathBuf, toml::de::Error),
    #[error("Config serialization error: {0}")]
    Serialize(toml::ser::Error),
    #[error("Config validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),
}

// ============================================================================
// Server / Storage
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP bind address
    #[serde(default = "default_server_addr")]
    pub addr: String,
}

fn default_server_addr() -> String {
    defaults::SERVER_ADDR.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { addr: default_server_addr() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the sled database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(defaults::DATA_DIR)
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: default_data_dir() }
    }
}

// ============================================================================
// Telemetry
// ============================================================================

/// Telemetry endpoint and the time-series keys each gauge quantity maps to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Base URL of the time-series API. Empty disables the HTTP adapter.
    #[serde(default)]
    pub base_url: String,

    /// Bearer token for the time-series API.
    #[serde(default)]
    pub token: String,

    /// HTTP request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Default timeout for a whole capture operation (seconds).
    #[serde(default = "default_capture_timeout")]
    pub capture_timeout_secs: u64,

    /// Samples older than this are flagged unreliable (seconds).
    #[serde(default = "default_freshness")]
    pub freshness_secs: i64,

    /// Default historical search half-window (seconds).
    #[serde(default = "default_tolerance")]
    pub historical_tolerance_secs: i64,

    #[serde(default = "default_level_key")]
    pub level_key: String,

    /// Temperature channels, averaged when present.
    #[serde(default = "default_temperature_keys")]
    pub temperature_keys: Vec<String>,

    #[serde(default = "default_pressure_key")]
    pub pressure_key: String,

    #[serde(default = "default_api_key")]
    pub api_gravity_key: String,

    #[serde(default = "default_bsw_key")]
    pub bsw_key: String,
}

fn default_request_timeout() -> u64 { 10 }
fn default_capture_timeout() -> u64 { defaults::CAPTURE_TIMEOUT_SECS }
fn default_freshness() -> i64 { defaults::TELEMETRY_FRESHNESS_SECS }
fn default_tolerance() -> i64 { defaults::HISTORICAL_TOLERANCE_SECS }
fn default_level_key() -> String { "level".to_string() }
fn default_temperature_keys() -> Vec<String> {
    vec![
        "temperature_1".to_string(),
        "temperature_2".to_string(),
        "temperature_3".to_string(),
    ]
}
fn default_pressure_key() -> String { "pressure".to_string() }
fn default_api_key() -> String { "api_gravity".to_string() }
fn default_bsw_key() -> String { "bsw".to_string() }

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: String::new(),
            request_timeout_secs: default_request_timeout(),
            capture_timeout_secs: default_capture_timeout(),
            freshness_secs: default_freshness(),
            historical_tolerance_secs: default_tolerance(),
            level_key: default_level_key(),
            temperature_keys: default_temperature_keys(),
            pressure_key: default_pressure_key(),
            api_gravity_key: default_api_key(),
            bsw_key: default_bsw_key(),
        }
    }
}

impl TelemetryConfig {
    /// Every key a full gauge capture asks for.
    pub fn capture_keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.temperature_keys.len() + 4);
        keys.push(self.level_key.clone());
        keys.extend(self.temperature_keys.iter().cloned());
        keys.push(self.pressure_key.clone());
        keys.push(self.api_gravity_key.clone());
        keys.push(self.bsw_key.clone());
        keys
    }
}

// ============================================================================
// Calculation
// ============================================================================

/// Constants for the simplified thermal correction.
///
/// Pressure and shell corrections are fixed at zero, so only the thermal
/// coefficient and reference temperature are exposed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CalculationConfig {
    /// Standard reference temperature (°C).
    #[serde(default = "default_reference_temp")]
    pub reference_temperature_c: f64,

    /// Volumetric thermal expansion coefficient (1/°C).
    #[serde(default = "default_thermal_coefficient")]
    pub thermal_expansion_coefficient: f64,
}

fn default_reference_temp() -> f64 { defaults::REFERENCE_TEMPERATURE_C }
fn default_thermal_coefficient() -> f64 { defaults::THERMAL_EXPANSION_COEFFICIENT }

impl Default for CalculationConfig {
    fn default() -> Self {
        Self {
            reference_temperature_c: default_reference_temp(),
            thermal_expansion_coefficient: default_thermal_coefficient(),
        }
    }
}

/// Plausibility ranges applied to gauge inputs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ValidationLimits {
    #[serde(default = "default_temp_min")]
    pub temperature_min_c: f64,
    #[serde(default = "default_temp_max")]
    pub temperature_max_c: f64,
    #[serde(default = "default_api_min")]
    pub api_gravity_min: f64,
    #[serde(default = "default_api_max")]
    pub api_gravity_max: f64,
    #[serde(default = "default_bsw_min")]
    pub bsw_min_percent: f64,
    #[serde(default = "default_bsw_max")]
    pub bsw_max_percent: f64,
}

fn default_temp_min() -> f64 { -50.0 }
fn default_temp_max() -> f64 { 150.0 }
fn default_api_min() -> f64 { 4.0 }
fn default_api_max() -> f64 { 99.9 }
fn default_bsw_min() -> f64 { 0.0 }
fn default_bsw_max() -> f64 { 100.0 }

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            temperature_min_c: default_temp_min(),
            temperature_max_c: default_temp_max(),
            api_gravity_min: default_api_min(),
            api_gravity_max: default_api_max(),
            bsw_min_percent: default_bsw_min(),
            bsw_max_percent: default_bsw_max(),
        }
    }
}

// ============================================================================
// Recalculation Approval Policy
// ============================================================================

/// Approval gate for post-closure recalculations.
///
/// Both limits are exclusive: a change exactly at the limit is auto-applied.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RecalculationPolicy {
    /// Maximum |% change| of transferred NSV applied without approval.
    #[serde(default = "default_max_pct")]
    pub max_percentage_change: f64,

    /// Maximum |mass difference| (kg) applied without approval.
    #[serde(default = "default_max_mass")]
    pub max_mass_difference_kg: f64,
}

fn default_max_pct() -> f64 { defaults::APPROVAL_PERCENTAGE_THRESHOLD }
fn default_max_mass() -> f64 { defaults::APPROVAL_MASS_THRESHOLD_KG }

impl Default for RecalculationPolicy {
    fn default() -> Self {
        Self {
            max_percentage_change: default_max_pct(),
            max_mass_difference_kg: default_max_mass(),
        }
    }
}

// ============================================================================
// Movement Detection
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MovementConfig {
    /// Samples kept in the sliding window.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Poll cadence (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// |rate| below this is idle (mm/h).
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold_mm_per_hour: f64,

    /// Minimum confidence before a suggestion is surfaced.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Suppression window after a suggestion is dismissed or acted upon (seconds).
    #[serde(default = "default_cooldown")]
    pub suggestion_cooldown_secs: u64,

    /// Event fan-out capacity per tank.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_buffer_size() -> usize { defaults::MOVEMENT_BUFFER_SIZE }
fn default_poll_interval() -> u64 { defaults::MOVEMENT_POLL_INTERVAL_SECS }
fn default_idle_threshold() -> f64 { defaults::IDLE_THRESHOLD_MM_PER_HOUR }
fn default_min_confidence() -> f64 { defaults::MIN_SUGGESTION_CONFIDENCE }
fn default_cooldown() -> u64 { defaults::SUGGESTION_COOLDOWN_SECS }
fn default_channel_capacity() -> usize { 16 }

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            poll_interval_secs: default_poll_interval(),
            idle_threshold_mm_per_hour: default_idle_threshold(),
            min_confidence: default_min_confidence(),
            suggestion_cooldown_secs: default_cooldown(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

// ============================================================================
// Lab Reconciliation
// ============================================================================

/// Single-field variance limits; exceeding any one marks the variance significant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// API gravity difference (°API).
    #[serde(default = "default_api_threshold")]
    pub api_gravity_threshold: f64,

    /// Temperature difference (°C).
    #[serde(default = "default_temp_threshold")]
    pub temperature_threshold_c: f64,

    /// BS&W difference (percentage points).
    #[serde(default = "default_bsw_threshold")]
    pub bsw_threshold_percent: f64,

    /// API gravity difference relative to closing API (%).
    #[serde(default = "default_pct_threshold")]
    pub percentage_threshold: f64,
}

fn default_api_threshold() -> f64 { 0.1 }
fn default_temp_threshold() -> f64 { 2.0 }
fn default_bsw_threshold() -> f64 { 0.5 }
fn default_pct_threshold() -> f64 { 0.5 }

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            api_gravity_threshold: default_api_threshold(),
            temperature_threshold_c: default_temp_threshold(),
            bsw_threshold_percent: default_bsw_threshold(),
            percentage_threshold: default_pct_threshold(),
        }
    }
}

// ============================================================================
// Tanks
// ============================================================================

/// Static tank metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TankConfig {
    pub id: String,

    /// Shell inner diameter (m).
    pub diameter_m: f64,

    /// API gravity assumed when telemetry carries none.
    #[serde(default = "default_api_base")]
    pub api_gravity_base: f64,

    #[serde(default)]
    pub product: String,

    /// Safe fill height (mm), used for duration estimates.
    #[serde(default)]
    pub max_level_mm: Option<f64>,
}

fn default_api_base() -> f64 { defaults::DEFAULT_API_GRAVITY }

// ============================================================================
// Tests
// ============================================================================
