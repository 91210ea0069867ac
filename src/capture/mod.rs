//! Gauge Capture
//!
//! Builds [`GaugeSnapshot`]s from operator input or tank telemetry. All
//! arithmetic is delegated to the calculator; this module only decides which
//! samples to use and how trustworthy they are.
//!
//! TOV comes from cylinder geometry until strapping tables are available.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use statrs::statistics::Statistics;
use std::sync::Arc;
use std::time::Duration;

use crate::calculator;
use crate::config::{CalculationConfig, TelemetryConfig, ValidationLimits};
use crate::error::{EngineError, EngineResult};
use crate::telemetry::{TankDirectory, TankInfo, TelemetrySample, TelemetrySeries, TelemetrySource};
use crate::types::{CaptureMethod, DataSource, GaugeInput, GaugeInputs, GaugeSnapshot};

/// Values picked from telemetry for one capture.
#[derive(Debug, Default)]
struct CapturedPoint {
    timestamp: Option<DateTime<Utc>>,
    level: Option<f64>,
    temperatures: Vec<f64>,
    api_gravity: Option<f64>,
    bsw: Option<f64>,
    pressure: Option<f64>,
    keys_used: Vec<String>,
}

pub struct GaugeCapture {
    telemetry: Arc<dyn TelemetrySource>,
    tanks: Arc<dyn TankDirectory>,
    keys: TelemetryConfig,
    calculation: CalculationConfig,
    limits: ValidationLimits,
}

impl GaugeCapture {
    pub fn new(
        telemetry: Arc<dyn TelemetrySource>,
        tanks: Arc<dyn TankDirectory>,
        keys: TelemetryConfig,
        calculation: CalculationConfig,
        limits: ValidationLimits,
    ) -> Self {
        Self {
            telemetry,
            tanks,
            keys,
            calculation,
            limits,
        }
    }

    pub async fn tank(&self, tank_id: &str) -> EngineResult<TankInfo> {
        self.tanks
            .get_tank(tank_id)
            .await
            .ok_or_else(|| EngineError::not_found("tank", tank_id))
    }

    /// Resolve a request's gauge input, bounded by `timeout`.
    pub async fn capture(
        &self,
        tank_id: &str,
        operator: &str,
        input: &GaugeInput,
        timeout: Duration,
    ) -> EngineResult<GaugeSnapshot> {
        let operation = match input {
            GaugeInput::Manual { .. } => "manual capture",
            GaugeInput::Live { .. } => "live capture",
            GaugeInput::Historical { .. } => "historical capture",
        };

        let work = async {
            match input {
                GaugeInput::Manual { inputs, timestamp } => {
                    self.manual(tank_id, operator, inputs, timestamp.unwrap_or_else(Utc::now))
                        .await
                }
                GaugeInput::Live { require_fresh } => {
                    let snapshot = self.live(tank_id, operator).await?;
                    if *require_fresh && !snapshot.is_reliable() {
                        return Err(EngineError::MissingTelemetry {
                            tank_id: tank_id.to_string(),
                            detail: format!(
                                "latest level sample is older than {}s",
                                self.keys.freshness_secs
                            ),
                        });
                    }
                    Ok(snapshot)
                }
                GaugeInput::Historical {
                    timestamp,
                    tolerance_secs,
                } => {
                    let tolerance = tolerance_secs.unwrap_or(self.keys.historical_tolerance_secs);
                    self.historical(tank_id, operator, *timestamp, tolerance).await
                }
            }
        };

        tokio::time::timeout(timeout, work)
            .await
            .map_err(|_| EngineError::Timeout {
                tank_id: tank_id.to_string(),
                operation,
                timeout_ms: timeout.as_millis(),
            })?
    }

    /// Operator-entered reading.
    pub async fn manual(
        &self,
        tank_id: &str,
        operator: &str,
        inputs: &GaugeInputs,
        timestamp: DateTime<Utc>,
    ) -> EngineResult<GaugeSnapshot> {
        let tank = self.tank(tank_id).await?;
        self.validate(inputs)?;
        let tov = calculator::cylinder_volume(tank.diameter_m, inputs.level);
        Ok(GaugeSnapshot {
            reading: calculator::build_reading(inputs, tov, timestamp, operator, &self.calculation),
            method: CaptureMethod::Manual,
            source: None,
        })
    }

    /// Reading from the latest telemetry.
    pub async fn live(&self, tank_id: &str, operator: &str) -> EngineResult<GaugeSnapshot> {
        self.live_at(tank_id, operator, Utc::now()).await
    }

    /// Live capture with an explicit "now" for the freshness check.
    pub async fn live_at(
        &self,
        tank_id: &str,
        operator: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<GaugeSnapshot> {
        let tank = self.tank(tank_id).await?;
        let series = self
            .telemetry
            .latest(tank_id, &self.keys.capture_keys())
            .await
            .map_err(|source| EngineError::TelemetryUnavailable {
                tank_id: tank_id.to_string(),
                operation: "live capture",
                source,
            })?;

        let point = self.pick(&series, None);
        let snapshot = self.assemble(&tank, operator, point, CaptureMethod::Live, |ts| {
            (now - ts).num_seconds() <= self.keys.freshness_secs
        })?;

        if !snapshot.is_reliable() {
            tracing::warn!(
                tank_id = %tank_id,
                sample_timestamp = %snapshot.reading.timestamp,
                "Live telemetry is stale; reading flagged unreliable"
            );
        }
        Ok(snapshot)
    }

    /// Reading from the telemetry sample closest to `target`.
    pub async fn historical(
        &self,
        tank_id: &str,
        operator: &str,
        target: DateTime<Utc>,
        tolerance_secs: i64,
    ) -> EngineResult<GaugeSnapshot> {
        let tank = self.tank(tank_id).await?;
        let tolerance = ChronoDuration::seconds(tolerance_secs);
        let series = self
            .telemetry
            .historical(
                tank_id,
                &self.keys.capture_keys(),
                target - tolerance,
                target + tolerance,
            )
            .await
            .map_err(|source| EngineError::TelemetryUnavailable {
                tank_id: tank_id.to_string(),
                operation: "historical capture",
                source,
            })?;

        let no_data = || EngineError::NoHistoricalData {
            tank_id: tank_id.to_string(),
            target,
            tolerance_secs,
        };
        if series.values().all(Vec::is_empty) {
            return Err(no_data());
        }

        let anchor = series
            .get(&self.keys.level_key)
            .and_then(|samples| nearest(samples, target))
            .ok_or_else(no_data)?;

        let point = self.pick(&series, Some(anchor.timestamp));
        self.assemble(&tank, operator, point, CaptureMethod::Historical, |ts| {
            (ts - target).num_seconds().abs() <= self.keys.freshness_secs
        })
    }

    /// Pick one value per key: the newest sample, or the one nearest `at`.
    fn pick(&self, series: &TelemetrySeries, at: Option<DateTime<Utc>>) -> CapturedPoint {
        let choose = |key: &str| -> Option<TelemetrySample> {
            let samples = series.get(key)?;
            let sample = match at {
                Some(at) => nearest(samples, at),
                None => samples.iter().max_by_key(|s| s.timestamp).copied(),
            };
            sample.filter(|s| s.value.is_finite())
        };

        let mut point = CapturedPoint::default();
        if let Some(level) = choose(&self.keys.level_key) {
            point.timestamp = Some(level.timestamp);
            point.level = Some(level.value);
            point.keys_used.push(self.keys.level_key.clone());
        }
        for key in &self.keys.temperature_keys {
            if let Some(t) = choose(key) {
                point.temperatures.push(t.value);
                point.keys_used.push(key.clone());
            }
        }
        for (key, slot) in [
            (&self.keys.api_gravity_key, &mut point.api_gravity),
            (&self.keys.bsw_key, &mut point.bsw),
            (&self.keys.pressure_key, &mut point.pressure),
        ] {
            if let Some(s) = choose(key) {
                *slot = Some(s.value);
                point.keys_used.push(key.clone());
            }
        }
        point
    }

    fn assemble<F>(
        &self,
        tank: &TankInfo,
        operator: &str,
        point: CapturedPoint,
        method: CaptureMethod,
        is_reliable: F,
    ) -> EngineResult<GaugeSnapshot>
    where
        F: Fn(DateTime<Utc>) -> bool,
    {
        let missing = |detail: &str| EngineError::MissingTelemetry {
            tank_id: tank.id.clone(),
            detail: detail.to_string(),
        };
        let (Some(timestamp), Some(level)) = (point.timestamp, point.level) else {
            return Err(missing("no level sample"));
        };
        if point.temperatures.is_empty() {
            return Err(missing("no temperature channel reported"));
        }

        let temperature = point.temperatures.iter().mean();
        let api_from_tank_default = point.api_gravity.is_none();
        let inputs = GaugeInputs {
            level,
            temperature,
            api_gravity: point.api_gravity.unwrap_or(tank.api_gravity_base),
            bsw: point.bsw,
        };
        self.validate(&inputs)?;

        let tov = calculator::cylinder_volume(tank.diameter_m, level);
        let reading = calculator::build_reading(&inputs, tov, timestamp, operator, &self.calculation);

        Ok(GaugeSnapshot {
            reading,
            method,
            source: Some(DataSource {
                keys_used: point.keys_used,
                temperature_channels: point.temperatures.len(),
                sample_timestamp: timestamp,
                source_reliable: is_reliable(timestamp),
                api_from_tank_default,
                pressure: point.pressure,
            }),
        })
    }

    fn validate(&self, inputs: &GaugeInputs) -> EngineResult<()> {
        let issues = calculator::validate(inputs, &self.limits);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(EngineError::ValidationFailed(issues))
        }
    }
}

/// Sample closest to `target`; the first one wins a tie.
fn nearest(samples: &[TelemetrySample], target: DateTime<Utc>) -> Option<TelemetrySample> {
    let mut best: Option<(i64, TelemetrySample)> = None;
    for s in samples {
        let distance = (s.timestamp - target).num_milliseconds().abs();
        if best.map_or(true, |(d, _)| distance < d) {
            best = Some((distance, *s));
        }
    }
    best.map(|(_, s)| s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TankConfig;
    use crate::error::ErrorKind;
    use crate::telemetry::{ConfigTankDirectory, InMemoryTelemetry};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap()
    }

    fn setup() -> (Arc<InMemoryTelemetry>, GaugeCapture) {
        let telemetry = Arc::new(InMemoryTelemetry::new());
        let tanks = Arc::new(ConfigTankDirectory::new(&[TankConfig {
            id: "TK-1".to_string(),
            diameter_m: 20.0,
            api_gravity_base: 33.0,
            product: "Crude".to_string(),
            max_level_mm: None,
        }]));
        let capture = GaugeCapture::new(
            telemetry.clone(),
            tanks,
            TelemetryConfig::default(),
            CalculationConfig::default(),
            ValidationLimits::default(),
        );
        (telemetry, capture)
    }

    #[tokio::test]
    async fn test_live_averages_available_channels() {
        let (telemetry, capture) = setup();
        telemetry.push_all(
            "TK-1",
            t0(),
            &[("level", 8500.0), ("temperature_1", 28.0), ("temperature_3", 30.0)],
        );

        let snap = capture.live_at("TK-1", "op", t0()).await.unwrap();
        assert_eq!(snap.reading.temperature, 29.0);
        assert_eq!(snap.reading.api_gravity, 33.0);
        assert_eq!(snap.reading.bsw, 0.0);

        let source = snap.source.unwrap();
        assert_eq!(source.temperature_channels, 2);
        assert!(source.api_from_tank_default);
        assert!(source.source_reliable);
    }

    #[tokio::test]
    async fn test_live_stale_is_flagged_not_rejected() {
        let (telemetry, capture) = setup();
        telemetry.push_all("TK-1", t0(), &[("level", 8500.0), ("temperature_1", 28.0)]);

        let later = t0() + ChronoDuration::seconds(61);
        let snap = capture.live_at("TK-1", "op", later).await.unwrap();
        assert!(!snap.is_reliable());
    }

    #[tokio::test]
    async fn test_live_missing_temperature() {
        let (telemetry, capture) = setup();
        telemetry.push_all("TK-1", t0(), &[("level", 8500.0)]);
        let err = capture.live_at("TK-1", "op", t0()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TelemetryUnavailable);
    }

    #[tokio::test]
    async fn test_historical_picks_nearest_sample() {
        let (telemetry, capture) = setup();
        for (offset, level) in [(-120, 8000.0), (-30, 8100.0), (90, 8200.0)] {
            let ts = t0() + ChronoDuration::seconds(offset);
            telemetry.push_all("TK-1", ts, &[("level", level), ("temperature_1", 25.0)]);
        }

        let snap = capture.historical("TK-1", "op", t0(), 300).await.unwrap();
        assert_eq!(snap.reading.level, 8100.0);
        assert_eq!(snap.reading.timestamp, t0() - ChronoDuration::seconds(30));
        assert_eq!(snap.method, CaptureMethod::Historical);
    }

    #[tokio::test]
    async fn test_historical_tie_goes_to_first_found() {
        let (telemetry, capture) = setup();
        telemetry.push_all(
            "TK-1",
            t0() - ChronoDuration::seconds(10),
            &[("level", 1.0), ("temperature_1", 25.0)],
        );
        telemetry.push_all(
            "TK-1",
            t0() + ChronoDuration::seconds(10),
            &[("level", 2.0), ("temperature_1", 25.0)],
        );
        let snap = capture.historical("TK-1", "op", t0(), 60).await.unwrap();
        assert_eq!(snap.reading.level, 1.0);
    }

    #[tokio::test]
    async fn test_historical_empty_window() {
        let (telemetry, capture) = setup();
        telemetry.push_all(
            "TK-1",
            t0() - ChronoDuration::hours(2),
            &[("level", 1.0), ("temperature_1", 25.0)],
        );
        let err = capture.historical("TK-1", "op", t0(), 300).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoHistoricalData);
    }

    #[tokio::test]
    async fn test_unknown_tank() {
        let (_, capture) = setup();
        let err = capture.live("TK-9", "op").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_manual_validation_failure() {
        let (_, capture) = setup();
        let inputs = GaugeInputs {
            level: -5.0,
            temperature: 20.0,
            api_gravity: 35.0,
            bsw: None,
        };
        let err = capture.manual("TK-1", "op", &inputs, t0()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_times_out() {
        let (telemetry, capture) = setup();
        telemetry.push_all("TK-1", t0(), &[("level", 8500.0), ("temperature_1", 28.0)]);
        telemetry.set_delay(Some(Duration::from_secs(30)));

        let err = capture
            .capture(
                "TK-1",
                "op",
                &GaugeInput::Live {
                    require_fresh: false,
                },
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }
}
