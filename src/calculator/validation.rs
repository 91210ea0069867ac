//! Gauge input range checks.
//!
//! Every violated constraint is reported, not just the first, so a form can
//! highlight all bad fields in one round trip.

use crate::config::ValidationLimits;
use crate::error::ValidationIssue;
use crate::types::GaugeInputs;

fn issue(field: &str, value: f64, message: String) -> ValidationIssue {
    ValidationIssue {
        field: field.to_string(),
        value,
        message,
    }
}

fn check_range(
    issues: &mut Vec<ValidationIssue>,
    field: &str,
    value: f64,
    min: f64,
    max: f64,
) {
    if !value.is_finite() {
        issues.push(issue(field, value, "must be a finite number".to_string()));
    } else if value < min || value > max {
        issues.push(issue(field, value, format!("must be within [{min}, {max}]")));
    }
}

/// Validate raw gauge inputs against the configured limits.
///
/// Returns an empty vector when the inputs are acceptable.
pub fn validate(inputs: &GaugeInputs, limits: &ValidationLimits) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if !inputs.level.is_finite() {
        issues.push(issue("level", inputs.level, "must be a finite number".to_string()));
    } else if inputs.level < 0.0 {
        issues.push(issue("level", inputs.level, "must be >= 0".to_string()));
    }

    check_range(
        &mut issues,
        "temperature",
        inputs.temperature,
        limits.temperature_min_c,
        limits.temperature_max_c,
    );
    check_range(
        &mut issues,
        "api_gravity",
        inputs.api_gravity,
        limits.api_gravity_min,
        limits.api_gravity_max,
    );
    if let Some(bsw) = inputs.bsw {
        check_range(
            &mut issues,
            "bsw",
            bsw,
            limits.bsw_min_percent,
            limits.bsw_max_percent,
        );
    }

    issues
}
