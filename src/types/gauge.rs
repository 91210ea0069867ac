//! Gauge measurement types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Volumes and mass derived from one set of gauge inputs.
///
/// Always produced as a unit by `calculator::derive_volumes`; there is no
/// way to update a single field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedVolumes {
    /// Total observed volume (m³)
    pub tov: f64,
    /// Gross observed volume (m³)
    pub gov: f64,
    /// Gross standard volume (m³)
    pub gsv: f64,
    /// Net standard volume (m³)
    pub nsv: f64,
    /// Water and sediment volume removed from GSV (m³)
    pub wia: f64,
    /// Density at standard conditions (kg/m³)
    pub density: f64,
    /// Net mass (kg)
    pub mass: f64,
}

/// Raw scalar inputs of a gauge measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaugeInputs {
    /// Product level (mm)
    pub level: f64,
    /// Average product temperature (°C)
    pub temperature: f64,
    /// API gravity (°API)
    pub api_gravity: f64,
    /// Bottom sediment and water (%), absent means not measured
    #[serde(default)]
    pub bsw: Option<f64>,
}

/// An immutable opening or closing measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugeReading {
    pub timestamp: DateTime<Utc>,
    pub operator: String,
    /// Product level (mm)
    pub level: f64,
    /// Temperature (°C)
    pub temperature: f64,
    /// API gravity (°API)
    pub api_gravity: f64,
    /// BS&W (%), zero when not measured
    pub bsw: f64,
    pub volumes: DerivedVolumes,
}

impl GaugeReading {
    pub fn nsv(&self) -> f64 {
        self.volumes.nsv
    }

    pub fn mass(&self) -> f64 {
        self.volumes.mass
    }

    pub fn wia(&self) -> f64 {
        self.volumes.wia
    }

    pub fn gsv(&self) -> f64 {
        self.volumes.gsv
    }
}

/// How a snapshot was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMethod {
    Manual,
    Live,
    Historical,
}

/// Where the snapshot's numbers came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    /// Telemetry keys that contributed a value
    pub keys_used: Vec<String>,
    /// Number of temperature channels averaged
    pub temperature_channels: usize,
    /// Timestamp of the level sample used
    pub sample_timestamp: DateTime<Utc>,
    /// False when the level sample is older than the freshness window
    pub source_reliable: bool,
    /// API gravity came from tank metadata instead of telemetry
    pub api_from_tank_default: bool,
    /// Pressure reading, informational only
    #[serde(default)]
    pub pressure: Option<f64>,
}

/// A GaugeReading tagged with its capture method and data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugeSnapshot {
    pub reading: GaugeReading,
    pub method: CaptureMethod,
    /// None for manual entry
    pub source: Option<DataSource>,
}

impl GaugeSnapshot {
    /// Manual readings are trusted as entered.
    pub fn is_reliable(&self) -> bool {
        self.source.as_ref().map_or(true, |s| s.source_reliable)
    }
}

/// How a lifecycle request supplies its gauge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum GaugeInput {
    /// Operator-entered values.
    Manual {
        #[serde(flatten)]
        inputs: GaugeInputs,
        /// Defaults to the request time
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    /// Latest telemetry.
    Live {
        /// Reject the capture instead of accepting stale telemetry
        #[serde(default)]
        require_fresh: bool,
    },
    /// Telemetry closest to a past timestamp.
    Historical {
        timestamp: DateTime<Utc>,
        #[serde(default)]
        tolerance_secs: Option<i64>,
    },
}
