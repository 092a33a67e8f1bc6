//! Per-source normalization formulas
//!
//! All functions are pure and total: degenerate inputs (no votes, zero
//! standard deviation) yield neutral values instead of NaN or infinity.

/// Bayesian smoothing toward the source mean
///
/// `S' = (N·S + M·μ) / (N + M)`
pub fn bayesian_smooth(score: f64, votes: u64, mean: f64, min_credible_votes: f64) -> f64 {
    let n = votes as f64;
    let denominator = n + min_credible_votes;
    if denominator <= 0.0 {
        return score;
    }
    (n * score + min_credible_votes * mean) / denominator
}

/// Standard score, 0 when the deviation is not positive
pub fn z_score(value: f64, mean: f64, std_dev: f64) -> f64 {
    if !(std_dev > 0.0) || !std_dev.is_finite() {
        return 0.0;
    }
    (value - mean) / std_dev
}

/// Weight of one source's observation: `ln(N)·P` (or `log10(N)·P`)
///
/// Observations with fewer than `min_votes` votes (and always N < 1)
/// weigh nothing.
pub fn source_weight(votes: u64, platform_weight: f64, min_votes: u64, natural_log: bool) -> f64 {
    if votes < min_votes.max(1) || !(platform_weight > 0.0) {
        return 0.0;
    }
    let n = votes as f64;
    let magnitude = if natural_log { n.ln() } else { n.log10() };
    magnitude * platform_weight
}

/// Confidence in a composite, in 0..=1
///
/// Blends source coverage (saturating at 3 sources) with vote magnitude
/// (saturating at a million votes). Non-decreasing in both arguments.
pub fn confidence(source_count: usize, total_votes: u64) -> f64 {
    let source_term = (source_count as f64 / 3.0).min(1.0);
    let vote_term = (((total_votes as f64) + 1.0).log10() / 6.0).clamp(0.0, 1.0);
    0.7 * source_term + 0.3 * vote_term
}
