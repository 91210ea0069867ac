//! Batch Lifecycle
//!
//! The only component that changes batch status or readings.
//!
//! ```text
//! open ──close──▶ closed ──recalculate──▶ recalculated ◀─┐
//!   │               │                        │   └────────┘
//!   └─────void──────┴──────────void──────────┴──▶ voided
//! ```
//!
//! Every transition runs under the batch's lock, bumps `revision`, persists
//! the batch and then appends an audit event. Audit appends are best-effort:
//! a failure is logged and the transition stands.

mod locks;

pub use locks::BatchLocks;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::calculator;
use crate::capture::GaugeCapture;
use crate::error::{EngineError, EngineResult, ValidationIssue};
use crate::storage::{AuditTrail, BatchRepository};
use crate::types::{
    AuditEvent, AuditEventType, Batch, BatchFilter, BatchPage, BatchStamps, BatchStatus,
    BatchType, CloseBatchRequest, CreateBatchRequest, RecalculationResult, VoidBatchRequest,
};

pub struct BatchLifecycle {
    repo: Arc<BatchRepository>,
    capture: Arc<GaugeCapture>,
    audit: Arc<dyn AuditTrail>,
    locks: BatchLocks,
    capture_timeout: Duration,
}

impl BatchLifecycle {
    pub fn new(
        repo: Arc<BatchRepository>,
        capture: Arc<GaugeCapture>,
        audit: Arc<dyn AuditTrail>,
        capture_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            capture,
            audit,
            locks: BatchLocks::new(),
            capture_timeout,
        }
    }

    pub fn repository(&self) -> &Arc<BatchRepository> {
        &self.repo
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn get(&self, batch_id: &str) -> EngineResult<Batch> {
        self.repo
            .get(batch_id)
            .await
            .map_err(EngineError::storage("load batch"))?
            .ok_or_else(|| EngineError::not_found("batch", batch_id))
    }

    pub async fn list(&self, filter: &BatchFilter) -> EngineResult<BatchPage> {
        self.repo
            .list(filter)
            .await
            .map_err(EngineError::storage("list batches"))
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    pub async fn create(&self, request: CreateBatchRequest) -> EngineResult<Batch> {
        let tank = self.capture.tank(&request.tank_id).await?;
        let snapshot = self
            .capture
            .capture(
                &request.tank_id,
                &request.operator,
                &request.opening,
                self.capture_timeout,
            )
            .await?;

        let now = Utc::now();
        let number = self
            .repo
            .next_number(now)
            .await
            .map_err(EngineError::storage("issue batch number"))?;

        let batch = Batch {
            id: uuid::Uuid::new_v4().to_string(),
            number,
            tank_id: request.tank_id.clone(),
            product: tank.product,
            batch_type: request.batch_type,
            status: BatchStatus::Open,
            opening: snapshot.reading,
            closing: None,
            transferred: None,
            transport: request.transport,
            notes: request.notes.unwrap_or_default(),
            void_reason: None,
            stamps: BatchStamps {
                created_at: now,
                created_by: request.operator.clone(),
                closed_at: None,
                closed_by: None,
                recalculated_at: None,
                recalculated_by: None,
                voided_at: None,
                voided_by: None,
            },
            revision: 1,
        };

        self.persist(&batch, "save created batch").await?;
        tracing::info!(
            batch_id = %batch.id,
            batch_number = %batch.number,
            tank_id = %batch.tank_id,
            batch_type = %batch.batch_type,
            "Batch opened"
        );

        self.record(
            AuditEvent::new(AuditEventType::Created, &batch.id, &batch.number, &request.operator)
                .with_detail("tank_id", batch.tank_id.as_str())
                .with_detail("batch_type", batch.batch_type.to_string())
                .with_detail("capture_method", serde_json::to_value(snapshot.method).unwrap_or_default())
                .with_detail("opening_level", batch.opening.level)
                .with_detail("opening_nsv", batch.opening.nsv())
                .with_detail("source_reliable", snapshot.source.as_ref().map_or(true, |s| s.source_reliable)),
        )
        .await;

        Ok(batch)
    }

    pub async fn close(&self, request: CloseBatchRequest) -> EngineResult<Batch> {
        let _guard = self.locks.acquire(&request.batch_id).await;
        let mut batch = self.get(&request.batch_id).await?;
        if batch.status != BatchStatus::Open {
            return Err(EngineError::InvalidTransition {
                batch_id: batch.id,
                from: batch.status,
                action: "close",
            });
        }

        let snapshot = self
            .capture
            .capture(
                &batch.tank_id,
                &request.operator,
                &request.closing,
                self.capture_timeout,
            )
            .await?;
        let closing = snapshot.reading;
        if closing.timestamp < batch.opening.timestamp {
            return Err(EngineError::ValidationFailed(vec![ValidationIssue {
                field: "timestamp".to_string(),
                value: closing.timestamp.timestamp() as f64,
                message: format!(
                    "closing gauge must not precede opening gauge at {}",
                    batch.opening.timestamp
                ),
            }]));
        }

        let delta = calculator::transfer(&batch.opening, &closing);
        let direction_consistent = match batch.batch_type {
            BatchType::Receiving => delta.nsv >= 0.0,
            BatchType::Dispensing => delta.nsv <= 0.0,
        };
        if !direction_consistent {
            tracing::warn!(
                batch_id = %batch.id,
                batch_type = %batch.batch_type,
                nsv_delta = delta.nsv,
                "Level moved against the batch type"
            );
        }

        let now = Utc::now();
        batch.closing = Some(closing);
        batch.transferred = Some(delta.magnitude());
        batch.status = BatchStatus::Closed;
        batch.stamps.closed_at = Some(now);
        batch.stamps.closed_by = Some(request.operator.clone());
        batch.revision += 1;

        self.persist(&batch, "save closed batch").await?;
        tracing::info!(
            batch_id = %batch.id,
            tank_id = %batch.tank_id,
            status = %batch.status,
            nsv = delta.magnitude().nsv,
            "Batch closed"
        );

        let moved = delta.magnitude();
        self.record(
            AuditEvent::new(AuditEventType::Closed, &batch.id, &batch.number, &request.operator)
                .with_detail("transferred_nsv", moved.nsv)
                .with_detail("transferred_mass", moved.mass)
                .with_detail("transferred_wia", moved.wia)
                .with_detail("direction_consistent", direction_consistent)
                .with_detail("source_reliable", snapshot.source.as_ref().map_or(true, |s| s.source_reliable)),
        )
        .await;

        Ok(batch)
    }

    /// Commit a recalculation computed against the batch's current revision.
    ///
    /// `rebuild` re-derives the result from the stored batch while its lock
    /// is held. Only the rebuilt readings and transfer are written; the
    /// caller's copy of the recalculated batch is never trusted.
    pub async fn recalculate<F>(
        &self,
        result: &RecalculationResult,
        committed_by: &str,
        rebuild: F,
    ) -> EngineResult<(Batch, RecalculationResult)>
    where
        F: FnOnce(&Batch) -> EngineResult<RecalculationResult>,
    {
        let batch_id = result.original.id.as_str();
        let _guard = self.locks.acquire(batch_id).await;
        let mut batch = self.get(batch_id).await?;
        if !batch.status.has_closing() {
            return Err(EngineError::InvalidTransition {
                batch_id: batch.id,
                from: batch.status,
                action: "recalculate",
            });
        }
        if batch.revision != result.original.revision {
            return Err(EngineError::StaleRecalculation {
                batch_id: batch.id,
                expected: result.original.revision,
                actual: batch.revision,
            });
        }

        let rebuilt = rebuild(&batch)?;
        let now = Utc::now();
        batch.opening = rebuilt.recalculated.opening.clone();
        batch.closing = rebuilt.recalculated.closing.clone();
        batch.transferred = rebuilt.recalculated.transferred;
        batch.status = BatchStatus::Recalculated;
        batch.stamps.recalculated_at = Some(now);
        batch.stamps.recalculated_by = Some(committed_by.to_string());
        batch.append_note(&format!(
            "[{}] Recalculated by {}: NSV {:+.3}%, mass {:+.1} kg{}",
            now.format("%Y-%m-%d %H:%M:%S UTC"),
            committed_by,
            rebuilt.percentage_change,
            rebuilt.mass_difference,
            rebuilt
                .reason
                .as_deref()
                .map(|r| format!(" ({r})"))
                .unwrap_or_default(),
        ));
        batch.revision += 1;

        self.persist(&batch, "save recalculated batch").await?;
        tracing::info!(
            batch_id = %batch.id,
            tank_id = %batch.tank_id,
            status = %batch.status,
            percentage_change = rebuilt.percentage_change,
            "Batch recalculated"
        );

        self.record(
            AuditEvent::new(AuditEventType::Recalculated, &batch.id, &batch.number, committed_by)
                .with_detail("requested_by", rebuilt.requested_by.as_str())
                .with_detail("percentage_change", rebuilt.percentage_change)
                .with_detail("mass_difference", rebuilt.mass_difference)
                .with_detail("required_approval", rebuilt.requires_approval)
                .with_detail("revisions", serde_json::to_value(rebuilt.revisions).unwrap_or_default()),
        )
        .await;

        Ok((batch, rebuilt))
    }

    pub async fn void(&self, request: VoidBatchRequest) -> EngineResult<Batch> {
        let _guard = self.locks.acquire(&request.batch_id).await;
        let mut batch = self.get(&request.batch_id).await?;
        if batch.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                batch_id: batch.id,
                from: batch.status,
                action: "void",
            });
        }
        if request.reason.trim().is_empty() {
            return Err(EngineError::ValidationFailed(vec![ValidationIssue {
                field: "reason".to_string(),
                value: 0.0,
                message: "a void reason is required".to_string(),
            }]));
        }

        let previous = batch.status;
        batch.status = BatchStatus::Voided;
        batch.void_reason = Some(request.reason.clone());
        batch.stamps.voided_at = Some(Utc::now());
        batch.stamps.voided_by = Some(request.operator.clone());
        batch.revision += 1;

        self.persist(&batch, "save voided batch").await?;
        tracing::info!(
            batch_id = %batch.id,
            tank_id = %batch.tank_id,
            previous_status = %previous,
            "Batch voided"
        );

        self.record(
            AuditEvent::new(AuditEventType::Voided, &batch.id, &batch.number, &request.operator)
                .with_detail("reason", request.reason.as_str())
                .with_detail("previous_status", previous.to_string()),
        )
        .await;

        Ok(batch)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn persist(&self, batch: &Batch, operation: &'static str) -> EngineResult<()> {
        if let Err(reason) = batch.check_invariants() {
            tracing::error!(batch_id = %batch.id, %reason, "Refusing to persist inconsistent batch");
            return Err(EngineError::InvalidTransition {
                batch_id: batch.id.clone(),
                from: batch.status,
                action: "persist",
            });
        }
        self.repo
            .save(batch)
            .await
            .map_err(EngineError::storage(operation))
    }

    /// Append an audit event without failing the caller.
    pub(crate) async fn record(&self, event: AuditEvent) {
        let (event_type, batch_id) = (event.event_type, event.batch_id.clone());
        if let Err(e) = self.audit.append(event).await {
            tracing::warn!(
                batch_id = %batch_id,
                event_type = ?event_type,
                error = %e,
                "Audit write failed; transition kept"
            );
        }
    }

    pub async fn audit_events(&self, batch_id: Option<&str>) -> EngineResult<Vec<AuditEvent>> {
        self.audit
            .list(batch_id)
            .await
            .map_err(EngineError::storage("list audit events"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CalculationConfig, TankConfig, TelemetryConfig, ValidationLimits};
    use crate::error::ErrorKind;
    use crate::storage::{InMemoryAuditTrail, InMemoryRecordStore, StorageError};
    use crate::telemetry::{ConfigTankDirectory, InMemoryTelemetry};
    use crate::types::{GaugeInput, GaugeInputs, TransportInfo};
    use async_trait::async_trait;

    struct FailingAudit;

    #[async_trait]
    impl AuditTrail for FailingAudit {
        async fn append(&self, _event: AuditEvent) -> Result<AuditEvent, StorageError> {
            Err(StorageError::Corrupt {
                key: "audit".to_string(),
                reason: "disk full".to_string(),
            })
        }
        async fn list(&self, _batch_id: Option<&str>) -> Result<Vec<AuditEvent>, StorageError> {
            Ok(Vec::new())
        }
        async fn clear(&self) -> Result<usize, StorageError> {
            Ok(0)
        }
    }

    fn lifecycle_with(audit: Arc<dyn AuditTrail>) -> BatchLifecycle {
        let tanks = Arc::new(ConfigTankDirectory::new(&[TankConfig {
            id: "TK-1".to_string(),
            diameter_m: 20.0,
            api_gravity_base: 35.0,
            product: "Crude".to_string(),
            max_level_mm: None,
        }]));
        let capture = Arc::new(GaugeCapture::new(
            Arc::new(InMemoryTelemetry::new()),
            tanks,
            TelemetryConfig::default(),
            CalculationConfig::default(),
            ValidationLimits::default(),
        ));
        let repo = Arc::new(BatchRepository::new(Arc::new(InMemoryRecordStore::new())));
        BatchLifecycle::new(repo, capture, audit, Duration::from_secs(5))
    }

    fn manual(level: f64, temperature: f64, api_gravity: f64, bsw: f64) -> GaugeInput {
        GaugeInput::Manual {
            inputs: GaugeInputs {
                level,
                temperature,
                api_gravity,
                bsw: Some(bsw),
            },
            timestamp: None,
        }
    }

    fn create_request(batch_type: BatchType) -> CreateBatchRequest {
        CreateBatchRequest {
            tank_id: "TK-1".to_string(),
            batch_type,
            operator: "alice".to_string(),
            opening: manual(8500.0, 28.5, 35.2, 0.3),
            transport: TransportInfo::default(),
            notes: None,
        }
    }

    fn close_request(batch_id: &str) -> CloseBatchRequest {
        CloseBatchRequest {
            batch_id: batch_id.to_string(),
            operator: "bob".to_string(),
            closing: manual(7200.0, 29.0, 35.3, 0.4),
        }
    }

    #[tokio::test]
    async fn test_create_and_close() {
        let lifecycle = lifecycle_with(Arc::new(InMemoryAuditTrail::new()));
        let batch = lifecycle.create(create_request(BatchType::Dispensing)).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Open);
        assert!(batch.number.starts_with("BT-"));
        assert_eq!(batch.product, "Crude");

        let closed = lifecycle.close(close_request(&batch.id)).await.unwrap();
        assert_eq!(closed.status, BatchStatus::Closed);
        let closing = closed.closing.as_ref().unwrap();
        let moved = closed.transferred.unwrap();
        assert_eq!(moved.nsv, (closed.opening.nsv() - closing.nsv()).abs());
        assert!(closed.check_invariants().is_ok());

        let events = lifecycle.audit_events(Some(&batch.id)).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].details["direction_consistent"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn test_close_twice_is_invalid_and_leaves_batch_unchanged() {
        let lifecycle = lifecycle_with(Arc::new(InMemoryAuditTrail::new()));
        let batch = lifecycle.create(create_request(BatchType::Dispensing)).await.unwrap();
        let closed = lifecycle.close(close_request(&batch.id)).await.unwrap();

        let err = lifecycle.close(close_request(&batch.id)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        assert_eq!(lifecycle.get(&batch.id).await.unwrap(), closed);
    }

    #[tokio::test]
    async fn test_direction_mismatch_is_recorded() {
        let lifecycle = lifecycle_with(Arc::new(InMemoryAuditTrail::new()));
        // Level falls but the batch says receiving
        let batch = lifecycle.create(create_request(BatchType::Receiving)).await.unwrap();
        let closed = lifecycle.close(close_request(&batch.id)).await.unwrap();
        assert!(closed.transferred.unwrap().nsv > 0.0);

        let events = lifecycle.audit_events(Some(&batch.id)).await.unwrap();
        assert_eq!(events[1].details["direction_consistent"], serde_json::json!(false));
    }

    #[tokio::test]
    async fn test_void_keeps_history_and_is_terminal() {
        let lifecycle = lifecycle_with(Arc::new(InMemoryAuditTrail::new()));
        let batch = lifecycle.create(create_request(BatchType::Dispensing)).await.unwrap();
        lifecycle.close(close_request(&batch.id)).await.unwrap();

        let void = |reason: &str| VoidBatchRequest {
            batch_id: batch.id.clone(),
            operator: "carol".to_string(),
            reason: reason.to_string(),
        };
        let voided = lifecycle.void(void("wrong tank")).await.unwrap();
        assert_eq!(voided.status, BatchStatus::Voided);
        assert!(voided.closing.is_some());
        assert_eq!(voided.void_reason.as_deref(), Some("wrong tank"));

        let err = lifecycle.void(void("again")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        let err = lifecycle.close(close_request(&batch.id)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[tokio::test]
    async fn test_void_requires_reason() {
        let lifecycle = lifecycle_with(Arc::new(InMemoryAuditTrail::new()));
        let batch = lifecycle.create(create_request(BatchType::Dispensing)).await.unwrap();
        let err = lifecycle
            .void(VoidBatchRequest {
                batch_id: batch.id,
                operator: "carol".to_string(),
                reason: "  ".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_roll_back() {
        let lifecycle = lifecycle_with(Arc::new(FailingAudit));
        let batch = lifecycle.create(create_request(BatchType::Dispensing)).await.unwrap();
        let closed = lifecycle.close(close_request(&batch.id)).await.unwrap();
        assert_eq!(lifecycle.get(&batch.id).await.unwrap().status, closed.status);
    }

    #[tokio::test]
    async fn test_unknown_tank_and_batch() {
        let lifecycle = lifecycle_with(Arc::new(InMemoryAuditTrail::new()));
        let mut req = create_request(BatchType::Receiving);
        req.tank_id = "TK-404".to_string();
        assert_eq!(lifecycle.create(req).await.unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(
            lifecycle.close(close_request("nope")).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_invalid_opening_is_rejected() {
        let lifecycle = lifecycle_with(Arc::new(InMemoryAuditTrail::new()));
        let mut req = create_request(BatchType::Receiving);
        req.opening = manual(8500.0, 200.0, 35.0, 0.0);
        let err = lifecycle.create(req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
        assert!(lifecycle.list(&BatchFilter::default()).await.unwrap().batches.is_empty());
    }
}
