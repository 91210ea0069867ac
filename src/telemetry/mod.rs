//! Telemetry and tank metadata collaborators
//!
//! The engine reads tank telemetry through [`TelemetrySource`] and tank
//! geometry through [`TankDirectory`]. Both are injected so the same capture
//! and movement logic runs against the HTTP time-series API, the simulator,
//! or an in-memory double in tests.

mod http;
mod simulated;
mod tanks;

pub use http::HttpTelemetrySource;
pub use simulated::SimulatedTelemetry;
pub use tanks::{ConfigTankDirectory, TankDirectory, TankInfo};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

/// One time-series point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl TelemetrySample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Samples keyed by telemetry key. Keys the source has no data for are
/// simply absent.
pub type TelemetrySeries = HashMap<String, Vec<TelemetrySample>>;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("telemetry server returned status {0}")]
    ServerError(reqwest::StatusCode),
    #[error("malformed telemetry payload: {0}")]
    Decode(String),
    #[error("telemetry source unavailable: {0}")]
    Unavailable(String),
}

/// Time-series query API for tank telemetry.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Most recent sample of each requested key.
    async fn latest(&self, tank_id: &str, keys: &[String])
        -> Result<TelemetrySeries, TelemetryError>;

    /// All samples of each requested key within `[start, end]`, in any order.
    async fn historical(
        &self,
        tank_id: &str,
        keys: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<TelemetrySeries, TelemetryError>;

    /// Backend name for logging
    fn source_name(&self) -> &'static str;
}

// ============================================================================
// In-memory source
// ============================================================================

/// Settable in-process telemetry, used by tests and local tooling.
#[derive(Default)]
pub struct InMemoryTelemetry {
    series: RwLock<HashMap<String, TelemetrySeries>>,
    delay: RwLock<Option<Duration>>,
    outage: RwLock<Option<String>>,
}

impl InMemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one sample for a tank/key.
    pub fn push(&self, tank_id: &str, key: &str, timestamp: DateTime<Utc>, value: f64) {
        let mut series = self.series.write().unwrap_or_else(|e| e.into_inner());
        series
            .entry(tank_id.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default()
            .push(TelemetrySample::new(timestamp, value));
    }

    /// Append several keys sharing one timestamp.
    pub fn push_all(&self, tank_id: &str, timestamp: DateTime<Utc>, values: &[(&str, f64)]) {
        for (key, value) in values {
            self.push(tank_id, key, timestamp, *value);
        }
    }

    /// Drop every sample of a tank.
    pub fn clear(&self, tank_id: &str) {
        let mut series = self.series.write().unwrap_or_else(|e| e.into_inner());
        series.remove(tank_id);
    }

    /// Delay every query, to exercise caller timeouts.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    /// Make every query fail with `Unavailable` until cleared with `None`.
    pub fn set_outage(&self, reason: Option<&str>) {
        *self.outage.write().unwrap_or_else(|e| e.into_inner()) = reason.map(str::to_string);
    }

    async fn before_query(&self) -> Result<(), TelemetryError> {
        let delay = *self.delay.read().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let outage = self.outage.read().unwrap_or_else(|e| e.into_inner()).clone();
        match outage {
            Some(reason) => Err(TelemetryError::Unavailable(reason)),
            None => Ok(()),
        }
    }

    fn select<F>(&self, tank_id: &str, keys: &[String], mut pick: F) -> TelemetrySeries
    where
        F: FnMut(&[TelemetrySample]) -> Vec<TelemetrySample>,
    {
        let series = self.series.read().unwrap_or_else(|e| e.into_inner());
        let Some(tank) = series.get(tank_id) else {
            return TelemetrySeries::new();
        };
        keys.iter()
            .filter_map(|key| {
                let picked = pick(tank.get(key)?);
                (!picked.is_empty()).then(|| (key.clone(), picked))
            })
            .collect()
    }
}

#[async_trait]
impl TelemetrySource for InMemoryTelemetry {
    async fn latest(
        &self,
        tank_id: &str,
        keys: &[String],
    ) -> Result<TelemetrySeries, TelemetryError> {
        self.before_query().await?;
        Ok(self.select(tank_id, keys, |samples| {
            samples
                .iter()
                .max_by_key(|s| s.timestamp)
                .copied()
                .into_iter()
                .collect()
        }))
    }

    async fn historical(
        &self,
        tank_id: &str,
        keys: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<TelemetrySeries, TelemetryError> {
        self.before_query().await?;
        Ok(self.select(tank_id, keys, |samples| {
            samples
                .iter()
                .filter(|s| s.timestamp >= start && s.timestamp <= end)
                .copied()
                .collect()
        }))
    }

    fn source_name(&self) -> &'static str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn test_latest_returns_newest_per_key() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let telemetry = InMemoryTelemetry::new();
        telemetry.push("TK-1", "level", t0 + chrono::Duration::seconds(10), 1010.0);
        telemetry.push("TK-1", "level", t0, 1000.0);

        let series = telemetry
            .latest("TK-1", &keys(&["level", "temperature_1"]))
            .await
            .unwrap();
        assert_eq!(series["level"], vec![TelemetrySample::new(
            t0 + chrono::Duration::seconds(10),
            1010.0
        )]);
        assert!(!series.contains_key("temperature_1"));
    }

    #[tokio::test]
    async fn test_historical_filters_window() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let telemetry = InMemoryTelemetry::new();
        for i in 0..10 {
            telemetry.push("TK-1", "level", t0 + chrono::Duration::minutes(i), i as f64);
        }
        let series = telemetry
            .historical(
                "TK-1",
                &keys(&["level"]),
                t0 + chrono::Duration::minutes(2),
                t0 + chrono::Duration::minutes(4),
            )
            .await
            .unwrap();
        assert_eq!(series["level"].len(), 3);
    }

    #[tokio::test]
    async fn test_outage_fails_queries() {
        let telemetry = InMemoryTelemetry::new();
        telemetry.set_outage(Some("gateway down"));
        let err = telemetry.latest("TK-1", &keys(&["level"])).await.unwrap_err();
        assert!(matches!(err, TelemetryError::Unavailable(_)));

        telemetry.set_outage(None);
        assert!(telemetry.latest("TK-1", &keys(&["level"])).await.unwrap().is_empty());
    }
}
