//! Read-only tank metadata lookups

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::TankConfig;

/// Geometry and product data for one tank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TankInfo {
    pub id: String,
    /// Shell inner diameter (m)
    pub diameter_m: f64,
    /// API gravity assumed when telemetry carries none
    pub api_gravity_base: f64,
    pub product: String,
    /// Safe fill height (mm)
    pub max_level_mm: Option<f64>,
}

impl From<&TankConfig> for TankInfo {
    fn from(t: &TankConfig) -> Self {
        Self {
            id: t.id.clone(),
            diameter_m: t.diameter_m,
            api_gravity_base: t.api_gravity_base,
            product: t.product.clone(),
            max_level_mm: t.max_level_mm,
        }
    }
}

#[async_trait]
pub trait TankDirectory: Send + Sync {
    async fn get_tank(&self, tank_id: &str) -> Option<TankInfo>;

    async fn list_tanks(&self) -> Vec<TankInfo>;
}

/// Directory backed by the `[[tanks]]` config section.
#[derive(Debug, Clone, Default)]
pub struct ConfigTankDirectory {
    tanks: HashMap<String, TankInfo>,
}

impl ConfigTankDirectory {
    pub fn new(tanks: &[TankConfig]) -> Self {
        Self {
            tanks: tanks.iter().map(|t| (t.id.clone(), TankInfo::from(t))).collect(),
        }
    }
}

#[async_trait]
impl TankDirectory for ConfigTankDirectory {
    async fn get_tank(&self, tank_id: &str) -> Option<TankInfo> {
        self.tanks.get(tank_id).cloned()
    }

    async fn list_tanks(&self) -> Vec<TankInfo> {
        let mut tanks: Vec<TankInfo> = self.tanks.values().cloned().collect();
        tanks.sort_by(|a, b| a.id.cmp(&b.id));
        tanks
    }
}
