//! Recalculation Engine
//!
//! Recomputes a closed batch under revised scalar inputs and gates the
//! commit behind [`RecalculationPolicy`]. Results within policy are applied
//! immediately; the rest are parked as pending until an explicit approve or
//! reject. Pending results and rejections are stored under the batch's tank:
//!
//! - `recalc_pending_{batch_id}`
//! - `recalc_rejection_{batch_id}_{n}`

mod compute;

pub use compute::{
    compare, evaluate_policy, percentage_change, preview, recompute, render_report,
    ApprovalDecision,
};

use chrono::Utc;
use std::sync::Arc;

use crate::config::{CalculationConfig, RecalculationPolicy, ValidationLimits};
use crate::error::{EngineError, EngineResult, ValidationIssue};
use crate::lifecycle::BatchLifecycle;
use crate::storage::{load_record, load_records, save_record, RecordStore};
use crate::types::{
    AuditEvent, AuditEventType, Batch, RecalculateBatchRequest, RecalculationOutcome,
    RecalculationRejection, RecalculationResult,
};

fn pending_key(batch_id: &str) -> String {
    format!("recalc_pending_{batch_id}")
}

fn rejection_prefix(batch_id: &str) -> String {
    format!("recalc_rejection_{batch_id}_")
}

pub struct RecalculationEngine {
    lifecycle: Arc<BatchLifecycle>,
    store: Arc<dyn RecordStore>,
    policy: RecalculationPolicy,
    limits: ValidationLimits,
    calculation: CalculationConfig,
}

impl RecalculationEngine {
    pub fn new(
        lifecycle: Arc<BatchLifecycle>,
        store: Arc<dyn RecordStore>,
        policy: RecalculationPolicy,
        limits: ValidationLimits,
        calculation: CalculationConfig,
    ) -> Self {
        Self {
            lifecycle,
            store,
            policy,
            limits,
            calculation,
        }
    }

    pub fn policy(&self) -> &RecalculationPolicy {
        &self.policy
    }

    /// Recompute `request.batch_id`; commit if within policy, else park it.
    pub async fn recalculate(
        &self,
        request: RecalculateBatchRequest,
    ) -> EngineResult<RecalculationResult> {
        let batch = self.lifecycle.get(&request.batch_id).await?;
        let result = preview(
            &batch,
            request.revisions,
            &self.policy,
            &self.limits,
            &self.calculation,
            &request.operator,
            request.reason,
            Utc::now(),
        )?;

        if result.requires_approval {
            save_record(self.store.as_ref(), &batch.tank_id, &pending_key(&batch.id), &result)
                .await
                .map_err(EngineError::storage("save pending recalculation"))?;
            tracing::info!(
                batch_id = %batch.id,
                percentage_change = result.percentage_change,
                mass_difference = result.mass_difference,
                reason = %result.approval_reason,
                "Recalculation awaiting approval"
            );
            return Ok(result);
        }

        let (committed, mut applied) = self
            .lifecycle
            .recalculate(&result, &request.operator, |current| self.rebuild(current, &result))
            .await?;
        self.clear_pending(&committed).await;
        applied.recalculated = committed;
        applied.outcome = RecalculationOutcome::Applied;
        Ok(applied)
    }

    /// Re-derive `result` from `current` using only its revised inputs.
    fn rebuild(
        &self,
        current: &Batch,
        result: &RecalculationResult,
    ) -> EngineResult<RecalculationResult> {
        preview(
            current,
            result.revisions,
            &self.policy,
            &self.limits,
            &self.calculation,
            &result.requested_by,
            result.reason.clone(),
            result.computed_at,
        )
    }

    /// The result awaiting approval for a batch, if any.
    pub async fn pending(&self, batch_id: &str) -> EngineResult<Option<RecalculationResult>> {
        let batch = self.lifecycle.get(batch_id).await?;
        load_record(self.store.as_ref(), &batch.tank_id, &pending_key(batch_id))
            .await
            .map_err(EngineError::storage("load pending recalculation"))
    }

    /// Commit a reviewed result. Without an explicit result the stored
    /// pending one is used.
    pub async fn approve(
        &self,
        batch_id: &str,
        result: Option<RecalculationResult>,
        approver: &str,
    ) -> EngineResult<Batch> {
        let result = match result {
            Some(r) => r,
            None => self
                .pending(batch_id)
                .await?
                .ok_or_else(|| EngineError::not_found("pending recalculation", batch_id))?,
        };
        if result.original.id != batch_id {
            return Err(EngineError::ValidationFailed(vec![ValidationIssue {
                field: "batch_id".to_string(),
                value: 0.0,
                message: format!(
                    "result belongs to batch {}, not {batch_id}",
                    result.original.id
                ),
            }]));
        }

        let (committed, _) = self
            .lifecycle
            .recalculate(&result, approver, |current| self.rebuild(current, &result))
            .await?;
        self.clear_pending(&committed).await;
        tracing::info!(batch_id = %batch_id, approver = %approver, "Recalculation approved");
        Ok(committed)
    }

    /// Record a rejection. The batch itself is left as it is.
    pub async fn reject(
        &self,
        batch_id: &str,
        reason: &str,
        rejected_by: &str,
    ) -> EngineResult<RecalculationRejection> {
        let batch = self.lifecycle.get(batch_id).await?;
        let pending: Option<RecalculationResult> =
            load_record(self.store.as_ref(), &batch.tank_id, &pending_key(batch_id))
                .await
                .map_err(EngineError::storage("load pending recalculation"))?;
        let pending =
            pending.ok_or_else(|| EngineError::not_found("pending recalculation", batch_id))?;

        let rejection = RecalculationRejection {
            batch_id: batch.id.clone(),
            rejected_by: rejected_by.to_string(),
            reason: reason.to_string(),
            rejected_at: Utc::now(),
            batch_revision: pending.original.revision,
            percentage_change: pending.percentage_change,
            mass_difference: pending.mass_difference,
        };

        let prefix = rejection_prefix(&batch.id);
        let n = self
            .store
            .keys(&batch.tank_id, &prefix)
            .await
            .map_err(EngineError::storage("count rejections"))?
            .len()
            + 1;
        save_record(self.store.as_ref(), &batch.tank_id, &format!("{prefix}{n:04}"), &rejection)
            .await
            .map_err(EngineError::storage("save rejection"))?;
        self.clear_pending(&batch).await;

        tracing::info!(batch_id = %batch.id, rejected_by = %rejected_by, "Recalculation rejected");
        self.lifecycle
            .record(
                AuditEvent::new(AuditEventType::Updated, &batch.id, &batch.number, rejected_by)
                    .with_detail("action", "recalculation_rejected")
                    .with_detail("reason", reason)
                    .with_detail("percentage_change", rejection.percentage_change)
                    .with_detail("mass_difference", rejection.mass_difference),
            )
            .await;

        Ok(rejection)
    }

    pub async fn rejections(&self, batch_id: &str) -> EngineResult<Vec<RecalculationRejection>> {
        let batch = self.lifecycle.get(batch_id).await?;
        load_records(self.store.as_ref(), &batch.tank_id, &rejection_prefix(batch_id))
            .await
            .map_err(EngineError::storage("list rejections"))
    }

    async fn clear_pending(&self, batch: &Batch) {
        if let Err(e) = self.store.remove(&batch.tank_id, &pending_key(&batch.id)).await {
            tracing::warn!(batch_id = %batch.id, error = %e, "Failed to clear pending recalculation");
        }
    }
}
