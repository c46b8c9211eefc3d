//! Shannon entropy over token distributions.

/// Lower clip applied to every probability before taking the logarithm.
pub const PROBABILITY_FLOOR: f64 = 1e-12;

/// Shannon entropy in nats of a (possibly unnormalised) probability vector.
///
/// Every component is clipped to `[1e-12, 1.0]` so zero entries never reach
/// `ln(0)`; non-finite components are treated as the floor. An empty vector
/// carries no uncertainty and yields `0.0`.
pub fn token_entropy(probs: &[f64]) -> f64 {
    let entropy: f64 = probs
        .iter()
        .map(|&p| {
            let p = if p.is_finite() {
                p.clamp(PROBABILITY_FLOOR, 1.0)
            } else {
                PROBABILITY_FLOOR
            };
            -p * p.ln()
        })
        .sum();
    entropy.max(0.0)
}

/// Numerically stable softmax. Degenerate logits (all `-inf`, NaN sums)
/// collapse to the uniform distribution.
pub fn softmax(logits: &[f32]) -> Vec<f64> {
    let vocab = logits.len();
    if vocab == 0 {
        return Vec::new();
    }

    let max_logit = logits
        .iter()
        .copied()
        .fold(f32::NEG_INFINITY, f32::max) as f64;
    let mut probs: Vec<f64> = logits
        .iter()
        .map(|&value| (value as f64 - max_logit).exp())
        .collect();
    let sum: f64 = probs.iter().sum();
    if sum == 0.0 || !sum.is_finite() {
        let uniform = 1.0 / vocab as f64;
        probs.iter_mut().for_each(|p| *p = uniform);
    } else {
        probs.iter_mut().for_each(|p| *p /= sum);
    }
    probs
}

/// Mean entropy over a set of attention rows (one row per head).
pub fn mean_row_entropy<R: AsRef<[f64]>>(rows: &[R]) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    let total: f64 = rows.iter().map(|row| token_entropy(row.as_ref())).sum();
    total / rows.len() as f64
}
