//! Lab-Batch Reconciler
//!
//! Matches a laboratory result to the latest closed (or recalculated) batch
//! of the same tank whose closing gauge is not after the sample, and
//! compares the lab's API gravity, temperature and BS&W with that closing
//! reading. Associations are stored under the tank as
//! `lab_association_{id}`, with a `lab_association_index/{id}` pointer.

use chrono::Utc;
use std::sync::Arc;

use crate::config::defaults::BARREL_IMPACT_FACTOR;
use crate::config::ReconciliationConfig;
use crate::error::{EngineError, EngineResult, ValidationIssue};
use crate::lifecycle::BatchLifecycle;
use crate::storage::{load_record, load_records, save_record, RecordStore};
use crate::types::{
    AssociationStatus, Batch, BatchFilter, GaugeReading, LabBatchAssociation, LabResult,
    RecalculationSuggestion, RevisedInputs, ScalarRevision, VarianceAnalysis,
};

const ASSOCIATION_PREFIX: &str = "lab_association_";
const INDEX_ENTITY: &str = "lab_association_index";

/// Compare a lab result with a closing reading.
pub fn analyze_variance(
    lab: &LabResult,
    closing: &GaugeReading,
    config: &ReconciliationConfig,
) -> VarianceAnalysis {
    let api_gravity_diff = lab.api_gravity - closing.api_gravity;
    let temperature_diff = lab.temperature - closing.temperature;
    let bsw_diff = lab.bsw - closing.bsw;
    let percentage_diff = if closing.api_gravity == 0.0 {
        0.0
    } else {
        api_gravity_diff.abs() / closing.api_gravity * 100.0
    };

    let mut exceeded = Vec::new();
    if api_gravity_diff.abs() > config.api_gravity_threshold {
        exceeded.push("api_gravity".to_string());
    }
    if temperature_diff.abs() > config.temperature_threshold_c {
        exceeded.push("temperature".to_string());
    }
    if bsw_diff.abs() > config.bsw_threshold_percent {
        exceeded.push("bsw".to_string());
    }
    if percentage_diff > config.percentage_threshold {
        exceeded.push("percentage".to_string());
    }

    VarianceAnalysis {
        api_gravity_diff,
        temperature_diff,
        bsw_diff,
        percentage_diff,
        significant: !exceeded.is_empty(),
        exceeded,
    }
}

/// Recommend a recalculation when the variance is significant.
///
/// The revised closing inputs carry the lab's values for every field whose
/// threshold was exceeded.
pub fn suggest_recalculation(
    lab: &LabResult,
    closing: &GaugeReading,
    variance: &VarianceAnalysis,
) -> RecalculationSuggestion {
    if !variance.significant {
        return RecalculationSuggestion {
            recommended: false,
            revisions: RevisedInputs::default(),
            estimated_barrel_impact: 0.0,
            confidence: 0.0,
            reason: "lab result within tolerance of closing gauge".to_string(),
        };
    }

    let exceeded = |field: &str| variance.exceeded.iter().any(|f| f == field);
    let revision = ScalarRevision {
        temperature: exceeded("temperature").then_some(lab.temperature),
        api_gravity: (exceeded("api_gravity") || exceeded("percentage")).then_some(lab.api_gravity),
        bsw: exceeded("bsw").then_some(lab.bsw),
    };

    let count = variance.exceeded.len() as f64;
    RecalculationSuggestion {
        recommended: true,
        revisions: RevisedInputs {
            opening: None,
            closing: Some(revision),
        },
        estimated_barrel_impact: variance.percentage_diff / 100.0
            * closing.volumes.gsv
            * BARREL_IMPACT_FACTOR,
        confidence: (0.5 + 0.125 * count).min(0.95),
        reason: format!(
            "lab variance exceeds thresholds: {}",
            variance.exceeded.join(", ")
        ),
    }
}

/// Latest closed/recalculated batch closed at or before the lab timestamp.
pub fn match_batch<'a>(batches: &'a [Batch], lab: &LabResult) -> Option<&'a Batch> {
    batches
        .iter()
        .filter(|b| b.tank_id == lab.tank_id && b.status.has_closing())
        .filter(|b| b.closing_timestamp().is_some_and(|ts| ts <= lab.timestamp))
        .max_by_key(|b| b.closing_timestamp())
}

fn association_key(id: &str) -> String {
    format!("{ASSOCIATION_PREFIX}{id}")
}

pub struct LabReconciler {
    lifecycle: Arc<BatchLifecycle>,
    store: Arc<dyn RecordStore>,
    config: ReconciliationConfig,
}

impl LabReconciler {
    pub fn new(
        lifecycle: Arc<BatchLifecycle>,
        store: Arc<dyn RecordStore>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            lifecycle,
            store,
            config,
        }
    }

    pub async fn associate(&self, lab: LabResult) -> EngineResult<LabBatchAssociation> {
        let page = self
            .lifecycle
            .list(&BatchFilter {
                tank_id: Some(lab.tank_id.clone()),
                ..BatchFilter::default()
            })
            .await?;
        let batch = match_batch(&page.batches, &lab).ok_or_else(|| EngineError::NoMatchingBatch {
            tank_id: lab.tank_id.clone(),
            timestamp: lab.timestamp,
        })?;
        let Some(ref closing) = batch.closing else {
            return Err(EngineError::NoMatchingBatch {
                tank_id: lab.tank_id.clone(),
                timestamp: lab.timestamp,
            });
        };

        let previously_rejected = self.associations(&lab.tank_id).await?.iter().any(|a| {
            a.lab_result.id == lab.id
                && a.batch_id == batch.id
                && a.status == AssociationStatus::Rejected
        });
        if previously_rejected {
            return Err(EngineError::AlreadyRejected {
                lab_result_id: lab.id.clone(),
                batch_id: batch.id.clone(),
            });
        }

        let variance = analyze_variance(&lab, closing, &self.config);
        let suggestion = suggest_recalculation(&lab, closing, &variance);
        let association = LabBatchAssociation {
            id: uuid::Uuid::new_v4().to_string(),
            batch_id: batch.id.clone(),
            batch_number: batch.number.clone(),
            variance,
            suggestion,
            status: AssociationStatus::Pending,
            created_at: Utc::now(),
            updated_at: None,
            updated_by: None,
            lab_result: lab,
        };
        self.save(&association).await?;

        tracing::info!(
            association_id = %association.id,
            lab_result_id = %association.lab_result.id,
            batch_id = %association.batch_id,
            significant = association.variance.significant,
            "Lab result associated"
        );
        Ok(association)
    }

    pub async fn associations(&self, tank_id: &str) -> EngineResult<Vec<LabBatchAssociation>> {
        let mut all: Vec<LabBatchAssociation> =
            load_records(self.store.as_ref(), tank_id, ASSOCIATION_PREFIX)
                .await
                .map_err(EngineError::storage("list lab associations"))?;
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    pub async fn get(&self, association_id: &str) -> EngineResult<LabBatchAssociation> {
        let tank: Option<String> = load_record(self.store.as_ref(), INDEX_ENTITY, association_id)
            .await
            .map_err(EngineError::storage("load lab association index"))?;
        let Some(tank) = tank else {
            return Err(EngineError::not_found("lab association", association_id));
        };
        load_record(self.store.as_ref(), &tank, &association_key(association_id))
            .await
            .map_err(EngineError::storage("load lab association"))?
            .ok_or_else(|| EngineError::not_found("lab association", association_id))
    }

    /// Move an association through pending → approved → recalculated, or to
    /// rejected from pending/approved.
    pub async fn update_status(
        &self,
        association_id: &str,
        status: AssociationStatus,
        actor: &str,
    ) -> EngineResult<LabBatchAssociation> {
        let mut association = self.get(association_id).await?;
        let allowed = matches!(
            (association.status, status),
            (AssociationStatus::Pending, AssociationStatus::Approved)
                | (AssociationStatus::Pending, AssociationStatus::Rejected)
                | (AssociationStatus::Pending, AssociationStatus::Recalculated)
                | (AssociationStatus::Approved, AssociationStatus::Rejected)
                | (AssociationStatus::Approved, AssociationStatus::Recalculated)
        );
        if !allowed {
            return Err(EngineError::ValidationFailed(vec![ValidationIssue {
                field: "status".to_string(),
                value: 0.0,
                message: format!(
                    "cannot move association from {:?} to {:?}",
                    association.status, status
                ),
            }]));
        }

        association.status = status;
        association.updated_at = Some(Utc::now());
        association.updated_by = Some(actor.to_string());
        self.save(&association).await?;
        tracing::info!(association_id = %association_id, status = ?status, "Lab association updated");
        Ok(association)
    }

    async fn save(&self, association: &LabBatchAssociation) -> EngineResult<()> {
        let tank = association.lab_result.tank_id.as_str();
        save_record(self.store.as_ref(), tank, &association_key(&association.id), association)
            .await
            .map_err(EngineError::storage("save lab association"))?;
        save_record(self.store.as_ref(), INDEX_ENTITY, &association.id, &tank)
            .await
            .map_err(EngineError::storage("save lab association index"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculator;
    use crate::config::CalculationConfig;
    use crate::types::GaugeInputs;
    use chrono::{DateTime, TimeZone};

    fn closing() -> GaugeReading {
        let inputs = GaugeInputs {
            level: 7200.0,
            temperature: 29.0,
            api_gravity: 35.3,
            bsw: Some(0.4),
        };
        calculator::build_reading(
            &inputs,
            calculator::cylinder_volume(20.0, 7200.0),
            Utc::now(),
            "op",
            &CalculationConfig::default(),
        )
    }

    fn lab(api_gravity: f64, temperature: f64, bsw: f64, at: DateTime<Utc>) -> LabResult {
        LabResult {
            id: "lab-1".to_string(),
            tank_id: "TK-1".to_string(),
            timestamp: at,
            api_gravity,
            temperature,
            bsw,
            density: None,
            viscosity: None,
            operator: "chemist".to_string(),
        }
    }

    #[test]
    fn test_within_tolerance() {
        let v = analyze_variance(&lab(35.35, 29.5, 0.5, Utc::now()), &closing(), &ReconciliationConfig::default());
        assert!(!v.significant);
        let s = suggest_recalculation(&lab(35.35, 29.5, 0.5, Utc::now()), &closing(), &v);
        assert!(!s.recommended);
        assert!(s.revisions.is_empty());
    }

    #[test]
    fn test_significant_api_and_bsw() {
        let closing = closing();
        let l = lab(35.0, 29.0, 1.2, Utc::now());
        let v = analyze_variance(&l, &closing, &ReconciliationConfig::default());
        assert!(v.significant);
        assert_eq!(v.exceeded, vec!["api_gravity", "bsw", "percentage"]);

        let s = suggest_recalculation(&l, &closing, &v);
        assert!(s.recommended);
        let rev = s.revisions.closing.unwrap();
        assert_eq!(rev.api_gravity, Some(35.0));
        assert_eq!(rev.bsw, Some(1.2));
        assert_eq!(rev.temperature, None);
        let expected = v.percentage_diff / 100.0 * closing.gsv() * 0.01;
        assert!((s.estimated_barrel_impact - expected).abs() < 1e-12);
        assert!(s.confidence > 0.5 && s.confidence <= 0.95);
    }

    #[test]
    fn test_match_picks_latest_closed_before_lab() {
        use crate::types::{BatchStamps, BatchStatus, BatchType, TransferredQuantities, TransportInfo};

        let t0 = Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap();
        let make = |id: &str, status: BatchStatus, closed_hours: i64| {
            let mut c = closing();
            c.timestamp = t0 + chrono::Duration::hours(closed_hours);
            let has = status.has_closing() || status == BatchStatus::Voided;
            Batch {
                id: id.to_string(),
                number: id.to_string(),
                tank_id: "TK-1".to_string(),
                product: String::new(),
                batch_type: BatchType::Dispensing,
                status,
                opening: closing(),
                closing: has.then(|| c.clone()),
                transferred: has.then_some(TransferredQuantities { nsv: 1.0, mass: 1.0, wia: 0.0 }),
                transport: TransportInfo::default(),
                notes: String::new(),
                void_reason: (status == BatchStatus::Voided).then(|| "x".to_string()),
                stamps: BatchStamps {
                    created_at: t0,
                    created_by: "op".to_string(),
                    closed_at: None,
                    closed_by: None,
                    recalculated_at: None,
                    recalculated_by: None,
                    voided_at: None,
                    voided_by: None,
                },
                revision: 1,
            }
        };
        let batches = vec![
            make("early", BatchStatus::Closed, 1),
            make("recalc", BatchStatus::Recalculated, 3),
            make("voided", BatchStatus::Voided, 4),
            make("future", BatchStatus::Closed, 10),
        ];

        let lab = lab(35.0, 29.0, 0.4, t0 + chrono::Duration::hours(5));
        assert_eq!(match_batch(&batches, &lab).unwrap().id, "recalc");

        let too_early = LabResult {
            timestamp: t0,
            ..lab
        };
        assert!(match_batch(&batches, &too_early).is_none());
    }
}
