//! Time-series REST adapter
//!
//! Queries `GET {base}/api/plugins/telemetry/DEVICE/{tank}/values/timeseries`
//! with the tank id as device id. Responses map each key to a list of
//! `{"ts": <epoch ms>, "value": <number or numeric string>}` points.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use super::{TelemetryError, TelemetrySample, TelemetrySeries, TelemetrySource};

/// Upper bound on points returned per key for a historical window.
const HISTORICAL_LIMIT: u32 = 10_000;

#[derive(Debug, Deserialize)]
struct RawPoint {
    ts: i64,
    value: serde_json::Value,
}

/// HTTP client for the telemetry server
#[derive(Clone)]
pub struct HttpTelemetrySource {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpTelemetrySource {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, TelemetryError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn endpoint(&self, tank_id: &str) -> String {
        format!(
            "{}/api/plugins/telemetry/DEVICE/{}/values/timeseries",
            self.base_url, tank_id
        )
    }

    async fn query(
        &self,
        tank_id: &str,
        params: Vec<(&'static str, String)>,
    ) -> Result<TelemetrySeries, TelemetryError> {
        let mut req = self.http.get(self.endpoint(tank_id)).query(&params);
        if !self.token.is_empty() {
            req = req.header("X-Authorization", format!("Bearer {}", self.token));
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(TelemetryError::ServerError(resp.status()));
        }
        let body = resp.bytes().await?;
        parse_timeseries(&body)
    }

    /// Base URL for logging
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn sample_value(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Decode a timeseries response body.
///
/// Points whose value is not numeric are dropped; keys left without points
/// are omitted.
pub(crate) fn parse_timeseries(body: &[u8]) -> Result<TelemetrySeries, TelemetryError> {
    let raw: HashMap<String, Vec<RawPoint>> =
        serde_json::from_slice(body).map_err(|e| TelemetryError::Decode(e.to_string()))?;

    let mut series = TelemetrySeries::new();
    for (key, points) in raw {
        let samples: Vec<TelemetrySample> = points
            .iter()
            .filter_map(|p| {
                let timestamp = Utc.timestamp_millis_opt(p.ts).single()?;
                let value = sample_value(&p.value)?;
                value.is_finite().then_some(TelemetrySample::new(timestamp, value))
            })
            .collect();
        if !samples.is_empty() {
            series.insert(key, samples);
        }
    }
    Ok(series)
}

#[async_trait]
impl TelemetrySource for HttpTelemetrySource {
    async fn latest(
        &self,
        tank_id: &str,
        keys: &[String],
    ) -> Result<TelemetrySeries, TelemetryError> {
        self.query(tank_id, vec![("keys", keys.join(","))]).await
    }

    async fn historical(
        &self,
        tank_id: &str,
        keys: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<TelemetrySeries, TelemetryError> {
        self.query(
            tank_id,
            vec![
                ("keys", keys.join(",")),
                ("startTs", start.timestamp_millis().to_string()),
                ("endTs", end.timestamp_millis().to_string()),
                ("limit", HISTORICAL_LIMIT.to_string()),
            ],
        )
        .await
    }

    fn source_name(&self) -> &'static str {
        "http"
    }
}
