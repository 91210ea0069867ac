//! Volume/Mass Calculator
//!
//! Deterministic petroleum-measurement arithmetic. No I/O, no clocks, no
//! randomness: the same inputs always produce the same derived volumes, which
//! is what makes closed batches reproducible for audit.
//!
//! ## Correction chain
//!
//! `level → TOV → GOV → GSV → NSV → mass`
//!
//! - TOV from cylinder geometry (no strapping table yet)
//! - GOV = TOV (free water and roof corrections are zero)
//! - GSV = GOV − thermal correction (pressure and shell corrections are zero)
//! - NSV = GSV − water/sediment volume
//! - mass = NSV × density(API)
//!
//! This is a simplified model, not an API-MPMS Chapter 11/12 implementation.

mod validation;

pub use validation::validate;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CalculationConfig;
use crate::types::{DerivedVolumes, GaugeInputs, GaugeReading, TransferredQuantities};

// ============================================================================
// Density
// ============================================================================

/// Density at standard conditions (kg/m³) from API gravity.
///
/// Formula: ρ = 141.5 / (API + 131.5) × 1000
pub fn density_from_api_gravity(api_gravity: f64) -> f64 {
    141.5 / (api_gravity + 131.5) * 1000.0
}

/// Inverse of [`density_from_api_gravity`].
///
/// Formula: API = 141.5 × 1000 / ρ − 131.5
pub fn api_gravity_from_density(density: f64) -> f64 {
    141.5 * 1000.0 / density - 131.5
}

// ============================================================================
// Volume
// ============================================================================

/// Provisional total observed volume of a vertical cylinder (m³).
///
/// `π·r²·h` with diameter in metres and level in millimetres. Stands in for a
/// calibrated strapping table.
pub fn cylinder_volume(diameter_m: f64, level_mm: f64) -> f64 {
    let radius = diameter_m / 2.0;
    std::f64::consts::PI * radius * radius * (level_mm / 1000.0)
}

/// Breakdown of the standard-volume correction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeCorrection {
    /// Thermal correction volume (m³), positive above reference temperature
    pub ctpl: f64,
    /// Pressure correction, fixed at zero
    pub pressure: f64,
    /// Steel shell correction, fixed at zero
    pub shell: f64,
    /// Gross standard volume (m³)
    pub gsv: f64,
}

/// Correct an observed volume to reference temperature.
///
/// `ctpl = V × k × (T − Tref)`, `gsv = V − ctpl`. API gravity does not enter
/// the linear model; it is taken so a table-driven CTL can replace this
/// without changing callers.
pub fn volume_correction(
    observed_volume: f64,
    temperature: f64,
    _api_gravity: f64,
    config: &CalculationConfig,
) -> VolumeCorrection {
    let ctpl = observed_volume
        * config.thermal_expansion_coefficient
        * (temperature - config.reference_temperature_c);
    VolumeCorrection {
        ctpl,
        pressure: 0.0,
        shell: 0.0,
        gsv: observed_volume - ctpl,
    }
}

/// Water and sediment volume contained in `volume` at `bsw` percent.
pub fn water_correction(volume: f64, bsw_percent: f64) -> f64 {
    volume * bsw_percent / 100.0
}

/// Run the whole correction chain from a total observed volume.
pub fn derive_volumes(
    tov: f64,
    temperature: f64,
    api_gravity: f64,
    bsw_percent: f64,
    config: &CalculationConfig,
) -> DerivedVolumes {
    let gov = tov;
    let correction = volume_correction(gov, temperature, api_gravity, config);
    let gsv = correction.gsv;
    let wia = water_correction(gsv, bsw_percent);
    let nsv = gsv - wia;
    let density = density_from_api_gravity(api_gravity);

    DerivedVolumes {
        tov,
        gov,
        gsv,
        nsv,
        wia,
        density,
        mass: nsv * density,
    }
}

/// Build a complete reading from inputs and an already-computed TOV.
pub fn build_reading(
    inputs: &GaugeInputs,
    tov: f64,
    timestamp: DateTime<Utc>,
    operator: &str,
    config: &CalculationConfig,
) -> GaugeReading {
    let bsw = inputs.bsw.unwrap_or(0.0);
    GaugeReading {
        timestamp,
        operator: operator.to_string(),
        level: inputs.level,
        temperature: inputs.temperature,
        api_gravity: inputs.api_gravity,
        bsw,
        volumes: derive_volumes(tov, inputs.temperature, inputs.api_gravity, bsw, config),
    }
}

/// Re-derive a reading with new scalar inputs, keeping level, TOV and timestamp.
pub fn rederive_reading(
    reading: &GaugeReading,
    temperature: f64,
    api_gravity: f64,
    bsw_percent: f64,
    config: &CalculationConfig,
) -> GaugeReading {
    GaugeReading {
        timestamp: reading.timestamp,
        operator: reading.operator.clone(),
        level: reading.level,
        temperature,
        api_gravity,
        bsw: bsw_percent,
        volumes: derive_volumes(reading.volumes.tov, temperature, api_gravity, bsw_percent, config),
    }
}

// ============================================================================
// Transfer
// ============================================================================

/// Signed change between two readings, `closing − opening`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransferDelta {
    pub nsv: f64,
    pub mass: f64,
    pub wia: f64,
}

impl TransferDelta {
    /// Quantities as reported on a batch: magnitudes only.
    pub fn magnitude(&self) -> TransferredQuantities {
        TransferredQuantities {
            nsv: self.nsv.abs(),
            mass: self.mass.abs(),
            wia: self.wia.abs(),
        }
    }
}

/// Difference of the already-derived quantities of two readings.
///
/// Never recomputes from levels.
pub fn transfer(opening: &GaugeReading, closing: &GaugeReading) -> TransferDelta {
    TransferDelta {
        nsv: closing.volumes.nsv - opening.volumes.nsv,
        mass: closing.volumes.mass - opening.volumes.mass,
        wia: closing.volumes.wia - opening.volumes.wia,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cfg() -> CalculationConfig {
        CalculationConfig::default()
    }

    fn reading(level: f64, temperature: f64, api: f64, bsw: f64) -> GaugeReading {
        let inputs = GaugeInputs {
            level,
            temperature,
            api_gravity: api,
            bsw: Some(bsw),
        };
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        build_reading(&inputs, cylinder_volume(20.0, level), ts, "op", &cfg())
    }

    #[test]
    fn test_density_roundtrip() {
        for api in [4.0, 10.5, 35.2, 60.0, 99.9] {
            let back = api_gravity_from_density(density_from_api_gravity(api));
            assert!((back - api).abs() < 1e-6, "api {api} came back as {back}");
        }
    }

    #[test]
    fn test_density_of_water_api() {
        // API 10 is the density of water by definition of the scale
        let rho = density_from_api_gravity(10.0);
        assert!((rho - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_cylinder_volume() {
        // 2 m diameter, 1 m of product: π m³
        let v = cylinder_volume(2.0, 1000.0);
        assert!((v - std::f64::consts::PI).abs() < 1e-12);
        assert_eq!(cylinder_volume(20.0, 0.0), 0.0);
    }

    #[test]
    fn test_no_correction_at_reference_temperature() {
        let c = volume_correction(1000.0, 15.0, 35.0, &cfg());
        assert_eq!(c.ctpl, 0.0);
        assert_eq!(c.gsv, 1000.0);
        assert_eq!(c.pressure, 0.0);
        assert_eq!(c.shell, 0.0);
    }

    #[test]
    fn test_thermal_correction() {
        // 1000 m³ at 25 °C: ctpl = 1000 × 0.0006 × 10 = 6
        let c = volume_correction(1000.0, 25.0, 35.0, &cfg());
        assert!((c.ctpl - 6.0).abs() < 1e-9);
        assert!((c.gsv - 994.0).abs() < 1e-9);
    }

    #[test]
    fn test_derive_volumes_chain() {
        let v = derive_volumes(1000.0, 15.0, 10.0, 2.0, &cfg());
        assert_eq!(v.gov, 1000.0);
        assert_eq!(v.gsv, 1000.0);
        assert!((v.wia - 20.0).abs() < 1e-9);
        assert!((v.nsv - 980.0).abs() < 1e-9);
        assert!((v.mass - 980_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_transfer_uses_derived_nsv() {
        let opening = reading(8500.0, 28.5, 35.2, 0.3);
        let closing = reading(7200.0, 29.0, 35.3, 0.4);
        let delta = transfer(&opening, &closing);
        let moved = delta.magnitude();

        assert!(delta.nsv < 0.0, "level fell, so closing NSV is smaller");
        assert_eq!(moved.nsv, (opening.nsv() - closing.nsv()).abs());
        assert_eq!(moved.mass, (opening.mass() - closing.mass()).abs());
        assert_eq!(moved.wia, (opening.wia() - closing.wia()).abs());
    }

    #[test]
    fn test_rederive_keeps_level_and_timestamp() {
        let original = reading(8500.0, 28.5, 35.2, 0.3);
        let revised = rederive_reading(&original, 30.0, 35.0, 1.0, &cfg());
        assert_eq!(revised.level, original.level);
        assert_eq!(revised.timestamp, original.timestamp);
        assert_eq!(revised.volumes.tov, original.volumes.tov);
        assert!(revised.nsv() < original.nsv());
    }
}
