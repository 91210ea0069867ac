//! Batch lifecycle integration tests
//!
//! Drive the [`BatchEngine`] facade end to end over in-memory collaborators:
//! create → close → recalculate → approve/reject, lab reconciliation and the
//! audit trail.

use chrono::{Duration, Utc};
use std::sync::Arc;

use custody_batch::config::{EngineConfig, TankConfig};
use custody_batch::telemetry::InMemoryTelemetry;
use custody_batch::types::{
    AuditEventType, CloseBatchRequest, CreateBatchRequest, RecalculateBatchRequest,
    RecalculationOutcome, ScalarRevision, TransportInfo, VoidBatchRequest,
};
use custody_batch::{
    AssociationStatus, Batch, BatchEngine, BatchFilter, BatchStatus, BatchType, EngineError,
    ErrorKind, GaugeInput, GaugeInputs, LabResult, RevisedInputs,
};

const TANK: &str = "TK-101";

fn engine() -> BatchEngine {
    let config = EngineConfig {
        tanks: vec![TankConfig {
            id: TANK.to_string(),
            diameter_m: 20.0,
            api_gravity_base: 35.0,
            product: "Crude".to_string(),
            max_level_mm: Some(15_000.0),
        }],
        ..EngineConfig::default()
    };
    BatchEngine::in_memory(&config, Arc::new(InMemoryTelemetry::new()))
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

/// Opening 8500 mm / 28.5 °C / 35.2 °API / 0.3 %, closing 7200 mm / 29.0 °C / 35.3 °API / 0.4 %.
async fn closed_dispensing_batch(engine: &BatchEngine) -> Batch {
    let batch = engine
        .create_batch(CreateBatchRequest {
            tank_id: TANK.to_string(),
            batch_type: BatchType::Dispensing,
            operator: "alice".to_string(),
            opening: manual(8500.0, 28.5, 35.2, 0.3),
            transport: TransportInfo::default(),
            notes: None,
        })
        .await
        .unwrap();

    engine
        .close_batch(CloseBatchRequest {
            batch_id: batch.id,
            operator: "bob".to_string(),
            closing: manual(7200.0, 29.0, 35.3, 0.4),
        })
        .await
        .unwrap()
}

fn closing_revision(revision: ScalarRevision) -> RevisedInputs {
    RevisedInputs {
        opening: None,
        closing: Some(revision),
    }
}

#[tokio::test]
async fn test_transfer_is_difference_of_derived_quantities() {
    let engine = engine();
    let batch = closed_dispensing_batch(&engine).await;

    let closing = batch.closing.as_ref().unwrap();
    let transferred = batch.transferred.unwrap();
    assert_eq!(batch.status, BatchStatus::Closed);
    assert_eq!(transferred.nsv, (batch.opening.nsv() - closing.nsv()).abs());
    assert_eq!(transferred.mass, (batch.opening.mass() - closing.mass()).abs());
    assert!(transferred.nsv > 400.0 && transferred.nsv < 410.0);
}

#[tokio::test]
async fn test_large_bsw_change_requires_approval_and_reject_keeps_batch_closed() {
    let engine = engine();
    let batch = closed_dispensing_batch(&engine).await;

    let result = engine
        .recalculate_batch(RecalculateBatchRequest {
            batch_id: batch.id.clone(),
            operator: "carol".to_string(),
            revisions: closing_revision(ScalarRevision {
                bsw: Some(2.0),
                ..ScalarRevision::default()
            }),
            reason: Some("lab BS&W".to_string()),
        })
        .await
        .unwrap();

    assert!(result.requires_approval);
    assert_eq!(result.outcome, RecalculationOutcome::PendingApproval);
    assert!(result.percentage_change.abs() > 0.5);
    assert!(engine.pending_recalculation(&batch.id).await.unwrap().is_some());

    // Nothing committed yet
    let unchanged = engine.get_batch(&batch.id).await.unwrap();
    assert_eq!(unchanged, batch);

    let rejection = engine
        .reject_recalculation(&batch.id, "sample contaminated", "dave")
        .await
        .unwrap();
    assert_eq!(rejection.batch_revision, batch.revision);
    assert_eq!(rejection.percentage_change, result.percentage_change);

    let after = engine.get_batch(&batch.id).await.unwrap();
    assert_eq!(after.status, BatchStatus::Closed);
    assert_eq!(after.transferred, batch.transferred);
    assert!(engine.pending_recalculation(&batch.id).await.unwrap().is_none());
    assert_eq!(engine.recalculation_rejections(&batch.id).await.unwrap().len(), 1);

    let audit = engine.batch_audit(&batch.id).await.unwrap();
    let types: Vec<_> = audit.iter().map(|e| e.event_type).collect();
    assert_eq!(
        types,
        vec![AuditEventType::Created, AuditEventType::Closed, AuditEventType::Updated]
    );
    assert_eq!(audit[2].details["action"], "recalculation_rejected");
}

#[tokio::test]
async fn test_small_change_is_applied_immediately() {
    let engine = engine();
    let batch = closed_dispensing_batch(&engine).await;

    let result = engine
        .recalculate_batch(RecalculateBatchRequest {
            batch_id: batch.id.clone(),
            operator: "carol".to_string(),
            revisions: closing_revision(ScalarRevision {
                temperature: Some(29.01),
                ..ScalarRevision::default()
            }),
            reason: None,
        })
        .await
        .unwrap();

    assert!(!result.requires_approval);
    assert_eq!(result.outcome, RecalculationOutcome::Applied);

    let after = engine.get_batch(&batch.id).await.unwrap();
    assert_eq!(after.status, BatchStatus::Recalculated);
    assert_eq!(after.revision, batch.revision + 1);
    assert_eq!(after.closing.as_ref().unwrap().temperature, 29.01);

    // Level and timestamps are never revised
    let before_closing = batch.closing.as_ref().unwrap();
    let after_closing = after.closing.as_ref().unwrap();
    assert_eq!(after_closing.level, before_closing.level);
    assert_eq!(after_closing.timestamp, before_closing.timestamp);
    assert_eq!(after.opening.level, batch.opening.level);
    assert!(after.notes.contains("Recalculated by carol"));
}

#[tokio::test]
async fn test_approving_superseded_result_is_stale() {
    let engine = engine();
    let batch = closed_dispensing_batch(&engine).await;

    let pending = engine
        .recalculate_batch(RecalculateBatchRequest {
            batch_id: batch.id.clone(),
            operator: "carol".to_string(),
            revisions: closing_revision(ScalarRevision {
                bsw: Some(2.0),
                ..ScalarRevision::default()
            }),
            reason: None,
        })
        .await
        .unwrap();
    assert!(pending.requires_approval);

    // A within-policy recalculation lands first and bumps the revision
    engine
        .recalculate_batch(RecalculateBatchRequest {
            batch_id: batch.id.clone(),
            operator: "erin".to_string(),
            revisions: closing_revision(ScalarRevision {
                temperature: Some(29.01),
                ..ScalarRevision::default()
            }),
            reason: None,
        })
        .await
        .unwrap();

    let err = engine
        .approve_recalculation(&batch.id, Some(pending), "supervisor")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::StaleRecalculation { .. }));
}

#[tokio::test]
async fn test_approve_commits_stored_pending_result() {
    let engine = engine();
    let batch = closed_dispensing_batch(&engine).await;

    engine
        .recalculate_batch(RecalculateBatchRequest {
            batch_id: batch.id.clone(),
            operator: "carol".to_string(),
            revisions: closing_revision(ScalarRevision {
                bsw: Some(2.0),
                ..ScalarRevision::default()
            }),
            reason: None,
        })
        .await
        .unwrap();

    let committed = engine
        .approve_recalculation(&batch.id, None, "supervisor")
        .await
        .unwrap();
    assert_eq!(committed.status, BatchStatus::Recalculated);
    assert_eq!(committed.closing.as_ref().unwrap().bsw, 2.0);
    assert_eq!(committed.stamps.recalculated_by.as_deref(), Some("supervisor"));
    assert!(engine.pending_recalculation(&batch.id).await.unwrap().is_none());

    // Nothing left to approve
    let err = engine
        .approve_recalculation(&batch.id, None, "supervisor")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_approval_recomputes_from_revisions_not_submitted_batch() {
    let engine = engine();
    let batch = closed_dispensing_batch(&engine).await;

    let mut edited = engine
        .recalculate_batch(RecalculateBatchRequest {
            batch_id: batch.id.clone(),
            operator: "carol".to_string(),
            revisions: closing_revision(ScalarRevision {
                bsw: Some(5.0),
                ..ScalarRevision::default()
            }),
            reason: None,
        })
        .await
        .unwrap();
    assert!(edited.requires_approval);

    // Client-side edits to the candidate batch must not reach the store
    edited.recalculated.opening.level = 99_999.0;
    edited.recalculated.opening.timestamp -= Duration::days(365);
    if let Some(ref mut closing) = edited.recalculated.closing {
        closing.level = 1.0;
    }
    if let Some(ref mut moved) = edited.recalculated.transferred {
        moved.nsv = 1.0;
        moved.mass = 1.0;
    }
    edited.percentage_change = 0.0;

    let committed = engine
        .approve_recalculation(&batch.id, Some(edited), "supervisor")
        .await
        .unwrap();

    let before_closing = batch.closing.as_ref().unwrap();
    let closing = committed.closing.as_ref().unwrap();
    assert_eq!(committed.opening.level, batch.opening.level);
    assert_eq!(committed.opening.timestamp, batch.opening.timestamp);
    assert_eq!(closing.level, before_closing.level);
    assert_eq!(closing.timestamp, before_closing.timestamp);
    assert_eq!(closing.bsw, 5.0);

    let moved = committed.transferred.unwrap();
    assert_eq!(moved.nsv, (committed.opening.nsv() - closing.nsv()).abs());
    assert_eq!(moved.mass, (committed.opening.mass() - closing.mass()).abs());
    assert!(!committed.notes.contains("NSV +0.000%"));

    let stored = engine.get_batch(&batch.id).await.unwrap();
    assert_eq!(stored, committed);
}

#[tokio::test]
async fn test_reject_without_pending_result_is_not_found() {
    let engine = engine();
    let batch = closed_dispensing_batch(&engine).await;

    let err = engine
        .reject_recalculation(&batch.id, "nothing to reject", "dave")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    assert!(engine.recalculation_rejections(&batch.id).await.unwrap().is_empty());
    let audit = engine.batch_audit(&batch.id).await.unwrap();
    assert_eq!(audit.len(), 2);
    assert_eq!(engine.get_batch(&batch.id).await.unwrap(), batch);
}

#[tokio::test]
async fn test_open_batch_cannot_be_recalculated_and_voided_is_terminal() {
    let engine = engine();
    let batch = engine
        .create_batch(CreateBatchRequest {
            tank_id: TANK.to_string(),
            batch_type: BatchType::Receiving,
            operator: "alice".to_string(),
            opening: manual(1000.0, 20.0, 35.0, 0.0),
            transport: TransportInfo::default(),
            notes: None,
        })
        .await
        .unwrap();

    let err = engine
        .recalculate_batch(RecalculateBatchRequest {
            batch_id: batch.id.clone(),
            operator: "carol".to_string(),
            revisions: closing_revision(ScalarRevision {
                bsw: Some(1.0),
                ..ScalarRevision::default()
            }),
            reason: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);

    let voided = engine
        .void_batch(VoidBatchRequest {
            batch_id: batch.id.clone(),
            operator: "alice".to_string(),
            reason: "wrong tank".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(voided.status, BatchStatus::Voided);
    assert!(voided.closing.is_none());
    assert!(voided.transferred.is_none());

    let err = engine
        .close_batch(CloseBatchRequest {
            batch_id: batch.id.clone(),
            operator: "bob".to_string(),
            closing: manual(2000.0, 20.0, 35.0, 0.0),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    assert_eq!(engine.get_batch(&batch.id).await.unwrap(), voided);
}

#[tokio::test]
async fn test_rejected_lab_association_is_not_duplicated() {
    let engine = engine();
    let batch = closed_dispensing_batch(&engine).await;

    let lab = LabResult {
        id: "LAB-7".to_string(),
        tank_id: TANK.to_string(),
        timestamp: Utc::now() + Duration::seconds(5),
        api_gravity: 34.6,
        temperature: 29.0,
        bsw: 1.2,
        density: None,
        viscosity: None,
        operator: "lab".to_string(),
    };

    let association = engine.associate_lab_result(lab.clone()).await.unwrap();
    assert_eq!(association.batch_id, batch.id);
    assert_eq!(association.status, AssociationStatus::Pending);
    assert!(association.variance.significant);
    assert!(association.suggestion.recommended);
    let revision = association.suggestion.revisions.closing.unwrap();
    assert_eq!(revision.bsw, Some(1.2));
    assert_eq!(revision.api_gravity, Some(34.6));
    assert_eq!(revision.temperature, None);

    engine
        .update_association_status(&association.id, AssociationStatus::Rejected, "dave")
        .await
        .unwrap();

    let err = engine.associate_lab_result(lab).await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyRejected { .. }));
    assert!(err.is_reconciliation_outcome());
    assert_eq!(engine.lab_associations(TANK).await.unwrap().len(), 1);

    // Rejected is final
    let err = engine
        .update_association_status(&association.id, AssociationStatus::Approved, "dave")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailed);
}

#[tokio::test]
async fn test_lab_result_without_closed_batch() {
    let engine = engine();
    let lab = LabResult {
        id: "LAB-1".to_string(),
        tank_id: TANK.to_string(),
        timestamp: Utc::now(),
        api_gravity: 35.0,
        temperature: 20.0,
        bsw: 0.2,
        density: None,
        viscosity: None,
        operator: "lab".to_string(),
    };

    let err = engine.associate_lab_result(lab).await.unwrap_err();
    assert!(matches!(err, EngineError::NoMatchingBatch { .. }));
}

#[tokio::test]
async fn test_listing_filters_and_paginates() {
    let engine = engine();
    closed_dispensing_batch(&engine).await;
    closed_dispensing_batch(&engine).await;
    engine
        .create_batch(CreateBatchRequest {
            tank_id: TANK.to_string(),
            batch_type: BatchType::Receiving,
            operator: "alice".to_string(),
            opening: manual(500.0, 20.0, 35.0, 0.0),
            transport: TransportInfo::default(),
            notes: None,
        })
        .await
        .unwrap();

    let all = engine.list_batches(&BatchFilter::default()).await.unwrap();
    assert_eq!(all.total_count, 3);

    let closed = engine
        .list_batches(&BatchFilter {
            status: Some(BatchStatus::Closed),
            ..BatchFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(closed.total_count, 2);
    assert!(closed.batches.iter().all(|b| b.batch_type == BatchType::Dispensing));

    let page = engine
        .list_batches(&BatchFilter {
            offset: 1,
            limit: Some(1),
            ..BatchFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total_count, 3);
    assert_eq!(page.batches.len(), 1);

    let numbers: Vec<_> = all.batches.iter().map(|b| b.number.clone()).collect();
    let year = Utc::now().format("%Y").to_string();
    assert!(numbers.iter().all(|n| n.starts_with(&format!("BT-{year}-"))));
}
