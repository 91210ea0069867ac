//! Batch Engine facade
//!
//! Wires capture, lifecycle, recalculation, reconciliation, movement
//! monitoring and the audit trail around injected collaborators. Every
//! caller-facing operation goes through here.

use std::sync::Arc;
use std::time::Duration;

use crate::capture::GaugeCapture;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::lifecycle::BatchLifecycle;
use crate::movement::{MovementMonitor, MovementStream};
use crate::recalc::{render_report, RecalculationEngine};
use crate::reconcile::LabReconciler;
use crate::storage::{
    AuditTrail, BatchRepository, InMemoryAuditTrail, InMemoryRecordStore, RecordStore,
};
use crate::telemetry::{ConfigTankDirectory, TankDirectory, TankInfo, TelemetrySource};
use crate::types::{
    AssociationStatus, AuditEvent, Batch, BatchFilter, BatchPage, CloseBatchRequest,
    CreateBatchRequest, GaugeInput, LabBatchAssociation, LabResult, MovementUpdate,
    RecalculateBatchRequest, RecalculationRejection, RecalculationResult, TransportInfo,
    VoidBatchRequest,
};

pub struct BatchEngine {
    lifecycle: Arc<BatchLifecycle>,
    recalculation: RecalculationEngine,
    reconciler: LabReconciler,
    monitor: MovementMonitor,
    tanks: Arc<dyn TankDirectory>,
}

impl BatchEngine {
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn RecordStore>,
        audit: Arc<dyn AuditTrail>,
        telemetry: Arc<dyn TelemetrySource>,
        tanks: Arc<dyn TankDirectory>,
    ) -> Self {
        let capture = Arc::new(GaugeCapture::new(
            Arc::clone(&telemetry),
            Arc::clone(&tanks),
            config.telemetry.clone(),
            config.calculation,
            config.validation,
        ));
        let repo = Arc::new(BatchRepository::new(Arc::clone(&store)));
        let lifecycle = Arc::new(BatchLifecycle::new(
            repo,
            capture,
            audit,
            Duration::from_secs(config.telemetry.capture_timeout_secs),
        ));

        tracing::info!(
            store = store.backend_name(),
            telemetry = telemetry.source_name(),
            tanks = config.tanks.len(),
            "Batch engine initialised"
        );

        Self {
            recalculation: RecalculationEngine::new(
                Arc::clone(&lifecycle),
                Arc::clone(&store),
                config.recalculation,
                config.validation,
                config.calculation,
            ),
            reconciler: LabReconciler::new(
                Arc::clone(&lifecycle),
                Arc::clone(&store),
                config.reconciliation,
            ),
            monitor: MovementMonitor::new(
                telemetry,
                Arc::clone(&tanks),
                config.movement,
                &config.telemetry.level_key,
            ),
            lifecycle,
            tanks,
        }
    }

    /// Engine over in-memory storage and the configured tanks.
    pub fn in_memory(config: &EngineConfig, telemetry: Arc<dyn TelemetrySource>) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryRecordStore::new()),
            Arc::new(InMemoryAuditTrail::new()),
            telemetry,
            Arc::new(ConfigTankDirectory::new(&config.tanks)),
        )
    }

    // ========================================================================
    // Batches
    // ========================================================================

    pub async fn create_batch(&self, request: CreateBatchRequest) -> EngineResult<Batch> {
        self.lifecycle.create(request).await
    }

    pub async fn close_batch(&self, request: CloseBatchRequest) -> EngineResult<Batch> {
        self.lifecycle.close(request).await
    }

    pub async fn void_batch(&self, request: VoidBatchRequest) -> EngineResult<Batch> {
        self.lifecycle.void(request).await
    }

    pub async fn get_batch(&self, batch_id: &str) -> EngineResult<Batch> {
        self.lifecycle.get(batch_id).await
    }

    pub async fn list_batches(&self, filter: &BatchFilter) -> EngineResult<BatchPage> {
        self.lifecycle.list(filter).await
    }

    pub async fn batch_audit(&self, batch_id: &str) -> EngineResult<Vec<AuditEvent>> {
        self.lifecycle.get(batch_id).await?;
        self.lifecycle.audit_events(Some(batch_id)).await
    }

    pub async fn audit_log(&self) -> EngineResult<Vec<AuditEvent>> {
        self.lifecycle.audit_events(None).await
    }

    // ========================================================================
    // Recalculation
    // ========================================================================

    pub async fn recalculate_batch(
        &self,
        request: RecalculateBatchRequest,
    ) -> EngineResult<RecalculationResult> {
        self.recalculation.recalculate(request).await
    }

    pub async fn approve_recalculation(
        &self,
        batch_id: &str,
        result: Option<RecalculationResult>,
        approver: &str,
    ) -> EngineResult<Batch> {
        self.recalculation.approve(batch_id, result, approver).await
    }

    pub async fn reject_recalculation(
        &self,
        batch_id: &str,
        reason: &str,
        rejected_by: &str,
    ) -> EngineResult<RecalculationRejection> {
        self.recalculation.reject(batch_id, reason, rejected_by).await
    }

    pub async fn pending_recalculation(
        &self,
        batch_id: &str,
    ) -> EngineResult<Option<RecalculationResult>> {
        self.recalculation.pending(batch_id).await
    }

    pub async fn recalculation_rejections(
        &self,
        batch_id: &str,
    ) -> EngineResult<Vec<RecalculationRejection>> {
        self.recalculation.rejections(batch_id).await
    }

    /// Text report for a result.
    pub fn comparison_report(&self, result: &RecalculationResult) -> String {
        render_report(result)
    }

    // ========================================================================
    // Movement
    // ========================================================================

    pub async fn start_monitoring(&self, tank_id: &str) -> EngineResult<MovementStream> {
        self.monitor.start(tank_id).await
    }

    pub fn stop_monitoring(&self, tank_id: &str) -> bool {
        self.monitor.stop(tank_id)
    }

    pub fn monitored_tanks(&self) -> Vec<String> {
        self.monitor.monitored_tanks()
    }

    pub fn latest_movement(&self, tank_id: &str) -> Option<MovementUpdate> {
        self.monitor.latest(tank_id)
    }

    pub fn dismiss_suggestion(&self, tank_id: &str) {
        self.monitor.suppress_suggestions(tank_id);
    }

    /// Open a batch of the suggested type from live telemetry.
    ///
    /// A suggestion is accepted at most once; a dismissed one cannot be
    /// accepted until the tank raises a new one after its cooldown.
    pub async fn accept_suggestion(
        &self,
        tank_id: &str,
        operator: &str,
    ) -> EngineResult<Batch> {
        let suggestion = self
            .monitor
            .claim_suggestion(tank_id)
            .ok_or_else(|| EngineError::not_found("batch suggestion", tank_id))?;
        let Some(batch_type) = suggestion.suggested_type else {
            return Err(EngineError::not_found("batch suggestion", tank_id));
        };

        let created = self
            .lifecycle
            .create(CreateBatchRequest {
                tank_id: tank_id.to_string(),
                batch_type,
                operator: operator.to_string(),
                opening: GaugeInput::Live {
                    require_fresh: false,
                },
                transport: TransportInfo::default(),
                notes: Some(format!(
                    "Opened from movement suggestion (confidence {:.2})",
                    suggestion.confidence
                )),
            })
            .await;
        if created.is_err() {
            self.monitor.release_suggestion(suggestion);
        }
        created
    }

    // ========================================================================
    // Lab reconciliation
    // ========================================================================

    pub async fn associate_lab_result(&self, lab: LabResult) -> EngineResult<LabBatchAssociation> {
        let lab_id = lab.id.clone();
        self.reconciler.associate(lab).await.inspect_err(|e| {
            if e.is_reconciliation_outcome() {
                tracing::info!(lab_result_id = %lab_id, outcome = e.kind().code(), "Lab result not associated");
            } else {
                tracing::warn!(lab_result_id = %lab_id, error = %e, "Lab association failed");
            }
        })
    }

    pub async fn lab_associations(&self, tank_id: &str) -> EngineResult<Vec<LabBatchAssociation>> {
        self.reconciler.associations(tank_id).await
    }

    pub async fn get_association(&self, association_id: &str) -> EngineResult<LabBatchAssociation> {
        self.reconciler.get(association_id).await
    }

    pub async fn update_association_status(
        &self,
        association_id: &str,
        status: AssociationStatus,
        actor: &str,
    ) -> EngineResult<LabBatchAssociation> {
        self.reconciler
            .update_status(association_id, status, actor)
            .await
    }

    // ========================================================================
    // Tanks
    // ========================================================================

    pub async fn tanks(&self) -> Vec<TankInfo> {
        self.tanks.list_tanks().await
    }

    pub async fn tank(&self, tank_id: &str) -> EngineResult<TankInfo> {
        self.tanks
            .get_tank(tank_id)
            .await
            .ok_or_else(|| EngineError::not_found("tank", tank_id))
    }

    /// Stop all monitoring tasks.
    pub fn shutdown(&self) {
        self.monitor.shutdown();
    }
}
