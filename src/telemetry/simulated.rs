//! Simulated tank telemetry for demo mode
//!
//! Each tank's level follows a slow sine wave around half its fill height,
//! so it alternates between receiving and dispensing phases, with a small
//! random jitter on every sample. Temperatures drift on a daily cycle with
//! per-channel noise. Both `latest` and `historical` evaluate the same
//! function of time, so a historical capture sees the same tank a live one
//! did.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::f64::consts::TAU;
use std::sync::Mutex;

use super::{TelemetryError, TelemetrySample, TelemetrySeries, TelemetrySource};
use crate::config::{TankConfig, TelemetryConfig};

/// Full level cycle (seconds).
const LEVEL_PERIOD_SECS: f64 = 6.0 * 3600.0;
/// Temperature cycle (seconds).
const TEMPERATURE_PERIOD_SECS: f64 = 24.0 * 3600.0;
/// Spacing of synthesized historical samples (seconds).
const HISTORICAL_STEP_SECS: i64 = 30;
/// Fill height assumed when a tank has no configured limit (mm).
const DEFAULT_FILL_HEIGHT_MM: f64 = 12_000.0;

#[derive(Debug, Clone)]
struct SimulatedTank {
    mid_level: f64,
    amplitude: f64,
    phase: f64,
    api_gravity: f64,
}

/// Random-walk telemetry source.
pub struct SimulatedTelemetry {
    tanks: HashMap<String, SimulatedTank>,
    keys: TelemetryConfig,
    rng: Mutex<StdRng>,
}

impl SimulatedTelemetry {
    pub fn new(tanks: &[TankConfig], keys: &TelemetryConfig, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let tanks = tanks
            .iter()
            .map(|t| {
                let fill = t.max_level_mm.unwrap_or(DEFAULT_FILL_HEIGHT_MM);
                let sim = SimulatedTank {
                    mid_level: fill * 0.5,
                    amplitude: fill * 0.35,
                    phase: rng.gen_range(0.0..TAU),
                    api_gravity: t.api_gravity_base,
                };
                (t.id.clone(), sim)
            })
            .collect();

        Self {
            tanks,
            keys: keys.clone(),
            rng: Mutex::new(rng),
        }
    }

    fn jitter(&self, spread: f64) -> f64 {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.gen_range(-spread..=spread)
    }

    fn value_at(&self, tank: &SimulatedTank, key: &str, at: DateTime<Utc>) -> Option<f64> {
        let t = at.timestamp() as f64;
        if key == self.keys.level_key {
            let level = tank.mid_level + tank.amplitude * (TAU * t / LEVEL_PERIOD_SECS + tank.phase).sin();
            return Some((level + self.jitter(0.5)).max(0.0));
        }
        if self.keys.temperature_keys.iter().any(|k| k == key) {
            let base = 25.0 + 4.0 * (TAU * t / TEMPERATURE_PERIOD_SECS).sin();
            return Some(base + self.jitter(0.3));
        }
        if key == self.keys.api_gravity_key {
            return Some(tank.api_gravity + self.jitter(0.05));
        }
        if key == self.keys.bsw_key {
            return Some((0.3 + self.jitter(0.1)).max(0.0));
        }
        if key == self.keys.pressure_key {
            return Some(101.3 + self.jitter(0.2));
        }
        None
    }

    fn tank(&self, tank_id: &str) -> Result<&SimulatedTank, TelemetryError> {
        self.tanks
            .get(tank_id)
            .ok_or_else(|| TelemetryError::Unavailable(format!("no simulated device {tank_id}")))
    }
}

#[async_trait]
impl TelemetrySource for SimulatedTelemetry {
    async fn latest(
        &self,
        tank_id: &str,
        keys: &[String],
    ) -> Result<TelemetrySeries, TelemetryError> {
        let tank = self.tank(tank_id)?;
        let now = Utc::now();
        Ok(keys
            .iter()
            .filter_map(|k| {
                let value = self.value_at(tank, k, now)?;
                Some((k.clone(), vec![TelemetrySample::new(now, value)]))
            })
            .collect())
    }

    async fn historical(
        &self,
        tank_id: &str,
        keys: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<TelemetrySeries, TelemetryError> {
        let tank = self.tank(tank_id)?;
        let mut series = TelemetrySeries::new();
        let mut at = start;
        while at <= end {
            for key in keys {
                if let Some(value) = self.value_at(tank, key, at) {
                    series
                        .entry(key.clone())
                        .or_default()
                        .push(TelemetrySample::new(at, value));
                }
            }
            at += Duration::seconds(HISTORICAL_STEP_SECS);
        }
        Ok(series)
    }

    fn source_name(&self) -> &'static str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tank() -> TankConfig {
        TankConfig {
            id: "TK-SIM".to_string(),
            diameter_m: 20.0,
            api_gravity_base: 32.0,
            product: "Crude".to_string(),
            max_level_mm: Some(10_000.0),
        }
    }

    #[tokio::test]
    async fn test_latest_covers_capture_keys() {
        let keys = TelemetryConfig::default();
        let sim = SimulatedTelemetry::new(&[tank()], &keys, 7);
        let series = sim.latest("TK-SIM", &keys.capture_keys()).await.unwrap();
        assert_eq!(series.len(), keys.capture_keys().len());

        let level = series[&keys.level_key][0].value;
        assert!((0.0..=10_000.0).contains(&level));
    }

    #[tokio::test]
    async fn test_unknown_tank_is_unavailable() {
        let keys = TelemetryConfig::default();
        let sim = SimulatedTelemetry::new(&[tank()], &keys, 7);
        assert!(sim.latest("TK-X", &keys.capture_keys()).await.is_err());
    }

    #[tokio::test]
    async fn test_historical_spacing() {
        let keys = TelemetryConfig::default();
        let sim = SimulatedTelemetry::new(&[tank()], &keys, 7);
        let end = Utc::now();
        let start = end - Duration::minutes(5);
        let series = sim
            .historical("TK-SIM", &[keys.level_key.clone()], start, end)
            .await
            .unwrap();
        assert_eq!(series[&keys.level_key].len(), 11);
    }
}
