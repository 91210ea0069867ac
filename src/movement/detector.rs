//! Level-trend classification over a sliding sample window.

use statrs::statistics::Statistics;
use std::collections::VecDeque;

use crate::config::MovementConfig;
use crate::telemetry::{TankInfo, TelemetrySample};
use crate::types::{BatchSuggestion, MovementClass, MovementEvent};

/// Per-tank sliding buffer of level samples.
#[derive(Debug)]
pub struct MovementDetector {
    tank_id: String,
    config: MovementConfig,
    buffer: VecDeque<TelemetrySample>,
}

impl MovementDetector {
    pub fn new(tank_id: &str, config: MovementConfig) -> Self {
        Self {
            tank_id: tank_id.to_string(),
            buffer: VecDeque::with_capacity(config.buffer_size),
            config,
        }
    }

    /// Add a sample and classify the window once it is full.
    ///
    /// A sample not newer than the last buffered one is ignored.
    pub fn push(&mut self, sample: TelemetrySample) -> Option<MovementEvent> {
        if self
            .buffer
            .back()
            .is_some_and(|last| sample.timestamp <= last.timestamp)
        {
            return None;
        }
        if self.buffer.len() == self.config.buffer_size {
            self.buffer.pop_front();
        }
        self.buffer.push_back(sample);

        if self.buffer.len() < self.config.buffer_size {
            return None;
        }
        let window: Vec<TelemetrySample> = self.buffer.iter().copied().collect();
        analyze(&self.tank_id, &window, &self.config)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Uniformity of the level steps: `max(0, 1 − CV)` of consecutive deltas.
///
/// A window with no net step (all deltas averaging zero) scores 0.
pub fn step_confidence(levels: &[f64]) -> f64 {
    let deltas: Vec<f64> = levels.windows(2).map(|w| w[1] - w[0]).collect();
    if deltas.is_empty() {
        return 0.0;
    }
    let mean = deltas.iter().mean();
    if !mean.is_finite() || mean == 0.0 {
        return 0.0;
    }
    let std_dev = if deltas.len() < 2 {
        0.0
    } else {
        deltas.iter().std_dev()
    };
    let cv = std_dev / mean.abs();
    if cv.is_finite() {
        (1.0 - cv).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Classify a window of samples ordered oldest first.
///
/// Returns `None` for fewer than two samples or a zero-length window.
pub fn analyze(
    tank_id: &str,
    samples: &[TelemetrySample],
    config: &MovementConfig,
) -> Option<MovementEvent> {
    let (first, last) = (samples.first()?, samples.last()?);
    let duration_secs = (last.timestamp - first.timestamp).num_milliseconds() as f64 / 1000.0;
    if samples.len() < 2 || duration_secs <= 0.0 {
        return None;
    }

    let level_delta = last.value - first.value;
    let rate = level_delta / (duration_secs / 3600.0);
    let classification = if rate.abs() < config.idle_threshold_mm_per_hour {
        MovementClass::Idle
    } else if rate > 0.0 {
        MovementClass::Receiving
    } else {
        MovementClass::Dispensing
    };

    let levels: Vec<f64> = samples.iter().map(|s| s.value).collect();
    Some(MovementEvent {
        tank_id: tank_id.to_string(),
        timestamp: last.timestamp,
        classification,
        rate,
        confidence: step_confidence(&levels),
        level_delta,
        sample_duration_secs: duration_secs,
        current_level: last.value,
    })
}

/// Turn an event into an operator prompt.
///
/// Duration runs to the tank's fill limit when receiving and to empty when
/// dispensing.
pub fn suggest(
    event: &MovementEvent,
    tank: Option<&TankInfo>,
    config: &MovementConfig,
) -> BatchSuggestion {
    let suggested_type = event.classification.batch_type();
    let estimated_duration_secs = match event.classification {
        MovementClass::Receiving => tank
            .and_then(|t| t.max_level_mm)
            .map(|max| (max - event.current_level).max(0.0) / event.rate * 3600.0),
        MovementClass::Dispensing => Some(event.current_level.max(0.0) / event.rate.abs() * 3600.0),
        MovementClass::Idle => None,
    };

    BatchSuggestion {
        tank_id: event.tank_id.clone(),
        should_prompt: suggested_type.is_some() && event.confidence >= config.min_confidence,
        suggested_type,
        confidence: event.confidence,
        estimated_duration_secs,
        event_timestamp: event.timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BatchType;
    use chrono::{Duration, TimeZone, Utc};

    fn window(levels: &[f64], step_secs: i64) -> Vec<TelemetrySample> {
        let t0 = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        levels
            .iter()
            .enumerate()
            .map(|(i, v)| TelemetrySample::new(t0 + Duration::seconds(i as i64 * step_secs), *v))
            .collect()
    }

    #[test]
    fn test_rising_window_is_receiving() {
        let config = MovementConfig::default();
        let event = analyze(
            "TK-1",
            &window(&[1000.0, 1015.0, 1030.0, 1045.0, 1060.0], 10),
            &config,
        )
        .unwrap();
        assert_eq!(event.classification, MovementClass::Receiving);
        assert!((event.rate - 5400.0).abs() < 1e-9);
        assert!(event.rate > config.idle_threshold_mm_per_hour);
        assert_eq!(event.confidence, 1.0);
        assert_eq!(event.level_delta, 60.0);
        assert_eq!(event.sample_duration_secs, 40.0);
    }

    #[test]
    fn test_flat_window_is_idle_with_zero_confidence() {
        let event = analyze("TK-1", &window(&[500.0; 5], 10), &MovementConfig::default()).unwrap();
        assert_eq!(event.classification, MovementClass::Idle);
        assert_eq!(event.confidence, 0.0);
        assert_eq!(event.rate, 0.0);
    }

    #[test]
    fn test_falling_window_is_dispensing() {
        let event = analyze(
            "TK-1",
            &window(&[2000.0, 1990.0, 1980.0, 1970.0, 1960.0], 10),
            &MovementConfig::default(),
        )
        .unwrap();
        assert_eq!(event.classification, MovementClass::Dispensing);
        assert!(event.rate < 0.0);
    }

    #[test]
    fn test_irregular_steps_lower_confidence() {
        let c = step_confidence(&[1000.0, 1030.0, 1031.0, 1058.0, 1060.0]);
        assert!(c < 0.6, "confidence {c}");
    }

    #[test]
    fn test_slow_drift_is_idle() {
        // 1 mm over 40 s = 90 mm/h would not be idle; 0.04 mm is
        let event = analyze(
            "TK-1",
            &window(&[500.0, 500.01, 500.02, 500.03, 500.04], 10),
            &MovementConfig::default(),
        )
        .unwrap();
        assert_eq!(event.classification, MovementClass::Idle);
    }

    #[test]
    fn test_detector_waits_for_full_buffer_and_slides() {
        let mut detector = MovementDetector::new("TK-1", MovementConfig::default());
        let samples = window(&[1000.0, 1015.0, 1030.0, 1045.0, 1060.0, 1060.0], 10);
        for s in &samples[..4] {
            assert!(detector.push(*s).is_none());
        }
        assert!(detector.push(samples[4]).is_some());
        // duplicate timestamp is ignored
        assert!(detector.push(samples[4]).is_none());
        let event = detector.push(samples[5]).unwrap();
        assert_eq!(detector.len(), 5);
        assert_eq!(event.level_delta, 45.0);
    }

    #[test]
    fn test_suggestion_prompt_and_duration() {
        let config = MovementConfig::default();
        let event = analyze(
            "TK-1",
            &window(&[1000.0, 1015.0, 1030.0, 1045.0, 1060.0], 10),
            &config,
        )
        .unwrap();
        let tank = TankInfo {
            id: "TK-1".to_string(),
            diameter_m: 20.0,
            api_gravity_base: 35.0,
            product: "Crude".to_string(),
            max_level_mm: Some(6460.0),
        };
        let s = suggest(&event, Some(&tank), &config);
        assert!(s.should_prompt);
        assert_eq!(s.suggested_type, Some(BatchType::Receiving));
        // 5400 mm remaining at 5400 mm/h
        assert!((s.estimated_duration_secs.unwrap() - 3600.0).abs() < 1e-6);

        let idle = analyze("TK-1", &window(&[500.0; 5], 10), &config).unwrap();
        let s = suggest(&idle, Some(&tank), &config);
        assert!(!s.should_prompt);
        assert!(s.estimated_duration_secs.is_none());
    }
}
