//! Gate score aggregation.

use crate::model::CheckResult;

/// Weighted mean of check scores, clamped to 0..=100.
///
/// Falls back to the unweighted mean when the weights sum to zero. A gate
/// with no checks scores 0.
pub fn weighted_score(results: &[CheckResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }

    let total_weight: f64 = results.iter().map(|r| r.weight.max(0.0)).sum();
    let score = if total_weight > 0.0 {
        results
            .iter()
            .map(|r| r.score * r.weight.max(0.0))
            .sum::<f64>()
            / total_weight
    } else {
        results.iter().map(|r| r.score).sum::<f64>() / results.len() as f64
    };

    clamp_score(score)
}

pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 100.0)
    }
}

/// Required checks that failed. Any entry vetoes the gate.
pub fn vetoes(results: &[CheckResult]) -> Vec<&CheckResult> {
    results.iter().filter(|r| r.required && !r.passed).collect()
}
