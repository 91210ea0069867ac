//! Pure recalculation: candidate batch, comparison rows and approval policy.

use chrono::{DateTime, Utc};

use crate::calculator;
use crate::config::{CalculationConfig, RecalculationPolicy, ValidationLimits};
use crate::error::{EngineError, EngineResult, ValidationIssue};
use crate::types::{
    Batch, ComparisonSection, FieldDifference, GaugeInputs, GaugeReading, RecalculationOutcome,
    RecalculationResult, RevisedInputs, ScalarRevision,
};

/// Approval verdict for one recalculation.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalDecision {
    pub required: bool,
    pub reason: String,
}

/// Apply the policy: approval is needed when either limit is strictly exceeded.
pub fn evaluate_policy(
    policy: &RecalculationPolicy,
    percentage_change: f64,
    mass_difference: f64,
) -> ApprovalDecision {
    let mut reasons = Vec::new();
    if percentage_change.abs() > policy.max_percentage_change {
        reasons.push(format!(
            "NSV change {:.3}% exceeds {}%",
            percentage_change.abs(),
            policy.max_percentage_change
        ));
    }
    if mass_difference.abs() > policy.max_mass_difference_kg {
        reasons.push(format!(
            "mass change {:.1} kg exceeds {} kg",
            mass_difference.abs(),
            policy.max_mass_difference_kg
        ));
    }

    if reasons.is_empty() {
        ApprovalDecision {
            required: false,
            reason: "within recalculation policy".to_string(),
        }
    } else {
        ApprovalDecision {
            required: true,
            reason: reasons.join("; "),
        }
    }
}

/// Signed change of transferred NSV in percent.
///
/// A zero baseline reports 0 when unchanged and ±100 otherwise.
pub fn percentage_change(old_nsv: f64, new_nsv: f64) -> f64 {
    if old_nsv == 0.0 {
        if new_nsv == 0.0 {
            0.0
        } else {
            100.0 * new_nsv.signum()
        }
    } else {
        (new_nsv - old_nsv) / old_nsv * 100.0
    }
}

fn revise(
    section: &str,
    reading: &GaugeReading,
    revision: Option<ScalarRevision>,
    limits: &ValidationLimits,
    calculation: &CalculationConfig,
    issues: &mut Vec<ValidationIssue>,
) -> GaugeReading {
    let Some(rev) = revision.filter(|r| !r.is_empty()) else {
        return reading.clone();
    };
    let inputs = GaugeInputs {
        level: reading.level,
        temperature: rev.temperature.unwrap_or(reading.temperature),
        api_gravity: rev.api_gravity.unwrap_or(reading.api_gravity),
        bsw: Some(rev.bsw.unwrap_or(reading.bsw)),
    };
    issues.extend(calculator::validate(&inputs, limits).into_iter().map(|mut i| {
        i.field = format!("{section}.{}", i.field);
        i
    }));
    calculator::rederive_reading(
        reading,
        inputs.temperature,
        inputs.api_gravity,
        inputs.bsw.unwrap_or(0.0),
        calculation,
    )
}

/// Build the candidate batch for `revisions` without touching `batch`.
///
/// Level and timestamps are carried over unchanged; only temperature, API
/// gravity and BS&W can differ.
pub fn recompute(
    batch: &Batch,
    revisions: &RevisedInputs,
    limits: &ValidationLimits,
    calculation: &CalculationConfig,
) -> EngineResult<Batch> {
    if !batch.status.has_closing() {
        return Err(EngineError::InvalidTransition {
            batch_id: batch.id.clone(),
            from: batch.status,
            action: "recalculate",
        });
    }
    let Some(ref closing) = batch.closing else {
        return Err(EngineError::InvalidTransition {
            batch_id: batch.id.clone(),
            from: batch.status,
            action: "recalculate",
        });
    };
    if revisions.is_empty() {
        return Err(EngineError::ValidationFailed(vec![ValidationIssue {
            field: "revisions".to_string(),
            value: 0.0,
            message: "at least one revised input is required".to_string(),
        }]));
    }

    let mut issues = Vec::new();
    let opening = revise("opening", &batch.opening, revisions.opening, limits, calculation, &mut issues);
    let closing = revise("closing", closing, revisions.closing, limits, calculation, &mut issues);
    if !issues.is_empty() {
        return Err(EngineError::ValidationFailed(issues));
    }

    let mut candidate = batch.clone();
    candidate.transferred = Some(calculator::transfer(&opening, &closing).magnitude());
    candidate.opening = opening;
    candidate.closing = Some(closing);
    Ok(candidate)
}

fn reading_rows(
    section: ComparisonSection,
    before: &GaugeReading,
    after: &GaugeReading,
    rows: &mut Vec<FieldDifference>,
) {
    let fields = [
        ("temperature", before.temperature, after.temperature),
        ("api_gravity", before.api_gravity, after.api_gravity),
        ("bsw", before.bsw, after.bsw),
        ("gsv", before.volumes.gsv, after.volumes.gsv),
        ("wia", before.volumes.wia, after.volumes.wia),
        ("nsv", before.volumes.nsv, after.volumes.nsv),
        ("density", before.volumes.density, after.volumes.density),
        ("mass", before.volumes.mass, after.volumes.mass),
    ];
    rows.extend(fields.into_iter().map(|(field, b, a)| FieldDifference {
        section,
        field: field.to_string(),
        before: b,
        after: a,
        delta: a - b,
    }));
}

/// Before/after rows for both readings and the transferred quantities.
pub fn compare(original: &Batch, candidate: &Batch) -> Vec<FieldDifference> {
    let mut rows = Vec::new();
    reading_rows(ComparisonSection::Opening, &original.opening, &candidate.opening, &mut rows);
    if let (Some(before), Some(after)) = (&original.closing, &candidate.closing) {
        reading_rows(ComparisonSection::Closing, before, after, &mut rows);
    }
    if let (Some(before), Some(after)) = (original.transferred, candidate.transferred) {
        for (field, b, a) in [
            ("nsv", before.nsv, after.nsv),
            ("mass", before.mass, after.mass),
            ("wia", before.wia, after.wia),
        ] {
            rows.push(FieldDifference {
                section: ComparisonSection::Transferred,
                field: field.to_string(),
                before: b,
                after: a,
                delta: a - b,
            });
        }
    }
    rows
}

/// Everything needed to review a recalculation, before any commit.
#[allow(clippy::too_many_arguments)]
pub fn preview(
    batch: &Batch,
    revisions: RevisedInputs,
    policy: &RecalculationPolicy,
    limits: &ValidationLimits,
    calculation: &CalculationConfig,
    requested_by: &str,
    reason: Option<String>,
    computed_at: DateTime<Utc>,
) -> EngineResult<RecalculationResult> {
    let candidate = recompute(batch, &revisions, limits, calculation)?;

    let old = batch.transferred.map_or(0.0, |t| t.nsv);
    let new = candidate.transferred.map_or(0.0, |t| t.nsv);
    let old_mass = batch.transferred.map_or(0.0, |t| t.mass);
    let new_mass = candidate.transferred.map_or(0.0, |t| t.mass);

    let pct = percentage_change(old, new);
    let mass_difference = new_mass - old_mass;
    let decision = evaluate_policy(policy, pct, mass_difference);

    Ok(RecalculationResult {
        differences: compare(batch, &candidate),
        original: batch.clone(),
        recalculated: candidate,
        revisions,
        percentage_change: pct,
        mass_difference,
        requires_approval: decision.required,
        approval_reason: decision.reason,
        outcome: if decision.required {
            RecalculationOutcome::PendingApproval
        } else {
            RecalculationOutcome::Applied
        },
        requested_by: requested_by.to_string(),
        reason,
        computed_at,
    })
}

/// Plain-text comparison report.
pub fn render_report(result: &RecalculationResult) -> String {
    let mut out = format!(
        "Recalculation of batch {} ({})\nRequested by {} at {}\n",
        result.original.number,
        result.original.tank_id,
        result.requested_by,
        result.computed_at.format("%Y-%m-%d %H:%M:%S UTC"),
    );
    if let Some(ref reason) = result.reason {
        out.push_str(&format!("Reason: {reason}\n"));
    }
    out.push_str(&format!(
        "{:<12} {:<12} {:>16} {:>16} {:>14}\n",
        "section", "field", "before", "after", "delta"
    ));
    for row in &result.differences {
        if row.delta == 0.0 && row.section != ComparisonSection::Transferred {
            continue;
        }
        let section = match row.section {
            ComparisonSection::Opening => "opening",
            ComparisonSection::Closing => "closing",
            ComparisonSection::Transferred => "transferred",
        };
        out.push_str(&format!(
            "{:<12} {:<12} {:>16.4} {:>16.4} {:>+14.4}\n",
            section, row.field, row.before, row.after, row.delta
        ));
    }
    out.push_str(&format!(
        "NSV change: {:+.4}%  Mass change: {:+.2} kg\nApproval: {} ({})\n",
        result.percentage_change,
        result.mass_difference,
        if result.requires_approval { "required" } else { "not required" },
        result.approval_reason,
    ));
    out
}
