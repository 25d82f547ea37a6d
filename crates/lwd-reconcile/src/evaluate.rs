use lwd_schemas::{Grams, ReconcilePolicy, ToleranceCheck, ToleranceStatus, WeightBasis};

/// Classify an absolute difference against a tolerance.
///
/// `good` up to the tolerance, `warning` up to twice it, `error` beyond.
pub fn classify(difference: Grams, tolerance: Grams) -> ToleranceStatus {
    if difference <= tolerance {
        ToleranceStatus::Good
    } else if difference <= tolerance.saturating_mul(2) {
        ToleranceStatus::Warning
    } else {
        ToleranceStatus::Error
    }
}

/// Reconcile the two latest values under `policy`.
///
/// Never fails. With no sample at all the result is the sentinel check:
/// difference 0, status `error`, final weight 0, source `controller`.
pub fn evaluate(
    controller: Option<Grams>,
    scale: Option<Grams>,
    policy: &ReconcilePolicy,
) -> ToleranceCheck {
    let tolerance = policy.tolerance;

    let (difference, status, final_weight, weight_source) = match (controller, scale) {
        (None, None) => (
            Grams::ZERO,
            ToleranceStatus::Error,
            Grams::ZERO,
            WeightBasis::Controller,
        ),
        (Some(c), None) => (Grams::ZERO, ToleranceStatus::Good, c, WeightBasis::Controller),
        (None, Some(s)) => (Grams::ZERO, ToleranceStatus::Good, s, WeightBasis::Scale),
        (Some(c), Some(s)) => {
            let difference = c.abs_diff(s);
            let status = classify(difference, tolerance);
            // Priority picks the value; status is independent of it.
            let final_weight = match policy.weight_source_priority {
                WeightBasis::Controller => c,
                WeightBasis::Scale => s,
                WeightBasis::Average => c.midpoint(s),
            };
            (difference, status, final_weight, policy.weight_source_priority)
        }
    };

    ToleranceCheck {
        difference,
        tolerance,
        status,
        final_weight,
        weight_source,
        controller_weight: controller,
        scale_weight: scale,
    }
}
