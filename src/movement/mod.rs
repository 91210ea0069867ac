//! Movement Detector
//!
//! One polling task per monitored tank. Each task owns its sliding buffer,
//! polls the level key at a fixed interval and publishes a
//! [`MovementUpdate`] per classified window on a broadcast channel.
//! Stopping a tank cancels its task immediately, even mid-poll, and drops
//! the buffer; subscribers see their stream end.

mod cooldown;
mod detector;

pub use cooldown::SuggestionCooldown;
pub use detector::{analyze, step_confidence, suggest, MovementDetector};

use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MovementConfig;
use crate::error::{EngineError, EngineResult};
use crate::telemetry::{TankDirectory, TankInfo, TelemetrySource};
use crate::types::{BatchSuggestion, MovementEvent, MovementUpdate};

/// Updates for one tank, ending when monitoring stops.
pub type MovementStream = BoxStream<'static, MovementUpdate>;

type Latest = Arc<RwLock<Option<MovementUpdate>>>;

struct MonitorSession {
    cancel: CancellationToken,
    sender: broadcast::Sender<MovementUpdate>,
    latest: Latest,
    handle: JoinHandle<()>,
}

/// Registry of per-tank monitoring tasks.
pub struct MovementMonitor {
    telemetry: Arc<dyn TelemetrySource>,
    tanks: Arc<dyn TankDirectory>,
    config: MovementConfig,
    level_key: String,
    cooldown: Arc<Mutex<SuggestionCooldown>>,
    sessions: Mutex<HashMap<String, MonitorSession>>,
    shutdown: CancellationToken,
}

impl MovementMonitor {
    pub fn new(
        telemetry: Arc<dyn TelemetrySource>,
        tanks: Arc<dyn TankDirectory>,
        config: MovementConfig,
        level_key: &str,
    ) -> Self {
        Self {
            telemetry,
            tanks,
            cooldown: Arc::new(Mutex::new(SuggestionCooldown::new(
                config.suggestion_cooldown_secs,
            ))),
            config,
            level_key: level_key.to_string(),
            sessions: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start polling a tank and subscribe to its updates.
    ///
    /// Starting an already-monitored tank just adds a subscriber.
    pub async fn start(&self, tank_id: &str) -> EngineResult<MovementStream> {
        let tank = self
            .tanks
            .get_tank(tank_id)
            .await
            .ok_or_else(|| EngineError::not_found("tank", tank_id))?;

        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = sessions.get(tank_id) {
            if !session.handle.is_finished() {
                return Ok(into_stream(session.sender.subscribe()));
            }
        }

        let (sender, receiver) = broadcast::channel(self.config.channel_capacity.max(1));
        let cancel = self.shutdown.child_token();
        let latest: Latest = Arc::new(RwLock::new(None));
        let poller = Poller {
            tank,
            telemetry: Arc::clone(&self.telemetry),
            config: self.config,
            level_key: self.level_key.clone(),
            cooldown: Arc::clone(&self.cooldown),
            sender: sender.clone(),
            latest: Arc::clone(&latest),
        };
        let handle = tokio::spawn(poller.run(cancel.clone()));

        info!(tank_id = %tank_id, interval_secs = self.config.poll_interval_secs, "Movement monitoring started");
        sessions.insert(
            tank_id.to_string(),
            MonitorSession {
                cancel,
                sender,
                latest,
                handle,
            },
        );
        Ok(into_stream(receiver))
    }

    /// Stop polling a tank. Returns false if it was not monitored.
    pub fn stop(&self, tank_id: &str) -> bool {
        let session = {
            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.remove(tank_id)
        };
        let Some(session) = session else {
            return false;
        };
        session.cancel.cancel();
        self.cooldown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear(tank_id);
        info!(tank_id = %tank_id, "Movement monitoring stopped");
        true
    }

    /// Additional subscriber for a running tank.
    pub fn subscribe(&self, tank_id: &str) -> Option<MovementStream> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .get(tank_id)
            .map(|s| into_stream(s.sender.subscribe()))
    }

    /// Most recent update for a tank, for polling clients.
    pub fn latest(&self, tank_id: &str) -> Option<MovementUpdate> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .get(tank_id)
            .and_then(|s| s.latest.read().unwrap_or_else(|e| e.into_inner()).clone())
    }

    pub fn is_monitoring(&self, tank_id: &str) -> bool {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.get(tank_id).is_some_and(|s| !s.handle.is_finished())
    }

    pub fn monitored_tanks(&self) -> Vec<String> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let mut tanks: Vec<String> = sessions.keys().cloned().collect();
        tanks.sort();
        tanks
    }

    /// Operator dismissed or acted on a suggestion: start the cooldown and
    /// withdraw the suggestion held for polling clients.
    pub fn suppress_suggestions(&self, tank_id: &str) {
        let mut cooldown = self.cooldown.lock().unwrap_or_else(|e| e.into_inner());
        cooldown.record(tank_id);
        self.withdraw_suggestion(tank_id);
        debug!(tank_id = %tank_id, "Suggestion cooldown started");
    }

    pub fn is_suppressed(&self, tank_id: &str) -> bool {
        self.cooldown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_suppressed(tank_id)
    }

    /// Take the current suggestion for acceptance, starting the cooldown.
    ///
    /// At most one caller gets a given suggestion; `None` when there is
    /// none or the tank is cooling down.
    pub fn claim_suggestion(&self, tank_id: &str) -> Option<BatchSuggestion> {
        let mut cooldown = self.cooldown.lock().unwrap_or_else(|e| e.into_inner());
        if cooldown.is_suppressed(tank_id) {
            return None;
        }
        let suggestion = self.withdraw_suggestion(tank_id)?;
        cooldown.record(tank_id);
        debug!(tank_id = %tank_id, "Suggestion claimed");
        Some(suggestion)
    }

    /// Undo a claim whose batch could not be opened.
    pub fn release_suggestion(&self, suggestion: BatchSuggestion) {
        let tank_id = suggestion.tank_id.clone();
        let mut cooldown = self.cooldown.lock().unwrap_or_else(|e| e.into_inner());
        cooldown.clear(&tank_id);
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = sessions.get(&tank_id) {
            let mut latest = session.latest.write().unwrap_or_else(|e| e.into_inner());
            if let Some(update) = latest.as_mut() {
                if update.suggestion.is_none() {
                    update.suggestion = Some(suggestion);
                }
            }
        }
    }

    fn withdraw_suggestion(&self, tank_id: &str) -> Option<BatchSuggestion> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let session = sessions.get(tank_id)?;
        let mut latest = session.latest.write().unwrap_or_else(|e| e.into_inner());
        latest.as_mut()?.suggestion.take()
    }

    /// Stop every tank.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let count = sessions.len();
        sessions.clear();
        info!(count, "Movement monitoring shut down");
    }
}

impl Drop for MovementMonitor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn into_stream(receiver: broadcast::Receiver<MovementUpdate>) -> MovementStream {
    futures::stream::unfold(receiver, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(update) => return Some((update, rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Movement subscriber lagging; skipped updates");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

// ============================================================================
// Polling task
// ============================================================================

struct Poller {
    tank: TankInfo,
    telemetry: Arc<dyn TelemetrySource>,
    config: MovementConfig,
    level_key: String,
    cooldown: Arc<Mutex<SuggestionCooldown>>,
    sender: broadcast::Sender<MovementUpdate>,
    latest: Latest,
}

impl Poller {
    async fn run(self, cancel: CancellationToken) {
        let mut detector = MovementDetector::new(&self.tank.id, self.config);
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let keys = [self.level_key.clone()];

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let polled = tokio::select! {
                _ = cancel.cancelled() => break,
                r = self.telemetry.latest(&self.tank.id, &keys) => r,
            };
            let sample = match polled {
                Ok(series) => series
                    .get(&self.level_key)
                    .and_then(|s| s.iter().max_by_key(|s| s.timestamp).copied()),
                Err(e) => {
                    warn!(tank_id = %self.tank.id, error = %e, "Level poll failed");
                    continue;
                }
            };
            let Some(sample) = sample else {
                debug!(tank_id = %self.tank.id, "No level sample this tick");
                continue;
            };

            if let Some(event) = detector.push(sample) {
                self.publish(event);
            }
        }

        detector.clear();
        debug!(tank_id = %self.tank.id, "Movement poller exited");
    }

    fn publish(&self, event: MovementEvent) {
        let suggestion = suggest(&event, Some(&self.tank), &self.config);
        let suppressed = self
            .cooldown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_suppressed(&self.tank.id);
        let suggestion = (suggestion.should_prompt && !suppressed).then_some(suggestion);

        if let Some(ref s) = suggestion {
            info!(
                tank_id = %self.tank.id,
                suggested_type = ?s.suggested_type,
                confidence = s.confidence,
                "Batch suggestion raised"
            );
        }

        let update = MovementUpdate { event, suggestion };
        *self.latest.write().unwrap_or_else(|e| e.into_inner()) = Some(update.clone());
        // No subscribers is fine; pollers still keep `latest` current
        let _ = self.sender.send(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TankConfig;
    use crate::telemetry::{ConfigTankDirectory, TelemetryError, TelemetrySample, TelemetrySeries};
    use crate::types::{BatchType, MovementClass};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Level rises 15 mm per poll, 10 s apart.
    struct FillingTank {
        polls: AtomicI64,
    }

    #[async_trait]
    impl TelemetrySource for FillingTank {
        async fn latest(
            &self,
            _tank_id: &str,
            keys: &[String],
        ) -> Result<TelemetrySeries, TelemetryError> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst);
            let t0 = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
            let sample = TelemetrySample::new(
                t0 + chrono::Duration::seconds(n * 10),
                1000.0 + 15.0 * n as f64,
            );
            Ok(keys.iter().map(|k| (k.clone(), vec![sample])).collect())
        }

        async fn historical(
            &self,
            _tank_id: &str,
            _keys: &[String],
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<TelemetrySeries, TelemetryError> {
            Ok(TelemetrySeries::new())
        }

        fn source_name(&self) -> &'static str {
            "filling"
        }
    }

    fn monitor() -> MovementMonitor {
        let tanks = Arc::new(ConfigTankDirectory::new(&[TankConfig {
            id: "TK-1".to_string(),
            diameter_m: 20.0,
            api_gravity_base: 35.0,
            product: "Crude".to_string(),
            max_level_mm: Some(12_000.0),
        }]));
        MovementMonitor::new(
            Arc::new(FillingTank {
                polls: AtomicI64::new(0),
            }),
            tanks,
            MovementConfig::default(),
            "level",
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_emits_receiving_with_suggestion() {
        let monitor = monitor();
        let mut stream = monitor.start("TK-1").await.unwrap();

        let update = stream.next().await.unwrap();
        assert_eq!(update.event.classification, MovementClass::Receiving);
        let suggestion = update.suggestion.unwrap();
        assert_eq!(suggestion.suggested_type, Some(BatchType::Receiving));
        assert!(monitor.latest("TK-1").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismissal_suppresses_suggestions() {
        let monitor = monitor();
        let mut stream = monitor.start("TK-1").await.unwrap();
        assert!(stream.next().await.unwrap().suggestion.is_some());

        monitor.suppress_suggestions("TK-1");
        let update = stream.next().await.unwrap();
        assert_eq!(update.event.classification, MovementClass::Receiving);
        assert!(update.suggestion.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_suggestion_claimed_at_most_once() {
        let monitor = monitor();
        let mut stream = monitor.start("TK-1").await.unwrap();
        assert!(stream.next().await.unwrap().suggestion.is_some());

        let claimed = monitor.claim_suggestion("TK-1").unwrap();
        assert_eq!(claimed.suggested_type, Some(BatchType::Receiving));
        assert!(monitor.is_suppressed("TK-1"));
        assert!(monitor.latest("TK-1").unwrap().suggestion.is_none());
        assert!(monitor.claim_suggestion("TK-1").is_none());

        // A failed accept hands the suggestion back
        monitor.release_suggestion(claimed);
        assert!(!monitor.is_suppressed("TK-1"));
        assert!(monitor.claim_suggestion("TK-1").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismissed_suggestion_cannot_be_claimed() {
        let monitor = monitor();
        let mut stream = monitor.start("TK-1").await.unwrap();
        assert!(stream.next().await.unwrap().suggestion.is_some());

        monitor.suppress_suggestions("TK-1");
        assert!(monitor.latest("TK-1").unwrap().suggestion.is_none());
        assert!(monitor.claim_suggestion("TK-1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_stream() {
        let monitor = monitor();
        let mut stream = monitor.start("TK-1").await.unwrap();
        assert!(monitor.is_monitoring("TK-1"));

        assert!(monitor.stop("TK-1"));
        assert!(stream.next().await.is_none());
        assert!(!monitor.is_monitoring("TK-1"));
        assert!(!monitor.stop("TK-1"));
    }

    #[tokio::test]
    async fn test_unknown_tank_is_not_found() {
        let monitor = monitor();
        assert!(monitor.start("TK-404").await.is_err());
    }
}
