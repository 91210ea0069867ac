//! Per-tank suggestion cooldown

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Suppresses batch suggestions for a tank after the operator dismissed or
/// acted on one.
pub struct SuggestionCooldown {
    cooldown: Duration,
    last_handled: HashMap<String, Instant>,
}

impl SuggestionCooldown {
    pub fn new(cooldown_secs: u64) -> Self {
        Self {
            cooldown: Duration::from_secs(cooldown_secs),
            last_handled: HashMap::new(),
        }
    }

    /// True while the tank is inside its cooldown window.
    pub fn is_suppressed(&self, tank_id: &str) -> bool {
        self.last_handled
            .get(tank_id)
            .is_some_and(|at| at.elapsed() < self.cooldown)
    }

    /// Start the cooldown for a tank.
    pub fn record(&mut self, tank_id: &str) {
        self.last_handled.insert(tank_id.to_string(), Instant::now());
    }

    /// Forget a tank, e.g. when its monitoring stops.
    pub fn clear(&mut self, tank_id: &str) {
        self.last_handled.remove(tank_id);
    }
}
