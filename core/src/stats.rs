//! Latency statistics over a set of per-execution durations.
//!
//! Percentiles use the nearest-rank method rounded up: for `n` samples the
//! `q` percentile is the sample at sorted rank `ceil(q * n)`, clamped into
//! `1..=n`. Results depend only on the multiset of inputs, never on the
//! order in which executions completed.

use serde::Serialize;

/// Quantile used for the `p95_ms` column.
pub const P95: f64 = 0.95;

/// Round a millisecond value to three decimal places (microsecond
/// resolution), as reported everywhere in the runner.
pub fn round_ms(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Nearest-rank percentile of unsorted `values`. Returns 0 for an empty
/// slice.
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    percentile_sorted(&sorted, q)
}

fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let last = sorted.len() - 1;
    let rank = (q * sorted.len() as f64).ceil() as i64 - 1;
    let idx = rank.clamp(0, last as i64) as usize;
    sorted[idx]
}

fn median_sorted(sorted: &[f64]) -> f64 {
    let len = sorted.len();
    match len {
        0 => 0.0,
        _ if len % 2 == 1 => sorted[len / 2],
        _ => (sorted[len / 2 - 1] + sorted[len / 2]) / 2.0,
    }
}

/// Summary of one script's successful durations, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AggregateStats {
    pub min_ms: f64,
    pub median_ms: f64,
    pub mean_ms: f64,
    pub p95_ms: f64,
    pub max_ms: f64,
}

impl AggregateStats {
    /// Compute all five figures from one sort of `samples`. An empty slice
    /// yields all zeros.
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);

        let sum: f64 = sorted.iter().sum();
        let mean = sum / sorted.len() as f64;

        Self {
            min_ms: round_ms(sorted[0]),
            median_ms: round_ms(median_sorted(&sorted)),
            mean_ms: round_ms(mean),
            p95_ms: round_ms(percentile_sorted(&sorted, P95)),
            max_ms: round_ms(sorted[sorted.len() - 1]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(percentile(&[], P95), 0.0);
        assert_eq!(AggregateStats::from_samples(&[]), AggregateStats::default());
    }

    #[test]
    fn nearest_rank_rounds_up() {
        let values: Vec<f64> = (1..=20).map(f64::from).collect();
        // ceil(0.95 * 20) = 19
        assert_eq!(percentile(&values, P95), 19.0);
        // ceil(0.5 * 20) = 10
        assert_eq!(percentile(&values, 0.5), 10.0);

        let values: Vec<f64> = (1..=10).map(f64::from).collect();
        // ceil(9.5) = 10
        assert_eq!(percentile(&values, P95), 10.0);
    }

    #[test]
    fn rank_is_clamped_into_bounds() {
        let values = [4.0, 1.0, 3.0];
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 1.0), 4.0);
        assert_eq!(percentile(&values, 7.5), 4.0);
        assert_eq!(percentile(&[2.5], P95), 2.5);
    }

    #[test]
    fn p95_is_invariant_under_permutation() {
        let mut rng = StdRng::seed_from_u64(0x5EED);
        for len in [1usize, 2, 7, 19, 20, 21, 100, 257] {
            let mut values: Vec<f64> = (0..len).map(|_| rng.gen_range(0.0..50.0)).collect();
            let mut sorted = values.clone();
            sorted.sort_by(f64::total_cmp);
            let rank = (0.95 * len as f64).ceil() as usize;
            let expected = sorted[rank - 1];

            for _ in 0..5 {
                values.shuffle(&mut rng);
                assert_eq!(percentile(&values, P95), expected, "len={len}");
                assert_eq!(
                    AggregateStats::from_samples(&values),
                    AggregateStats::from_samples(&sorted)
                );
            }
        }
    }

    #[test]
    fn aggregate_matches_hand_computed_values() {
        let stats = AggregateStats::from_samples(&[3.0, 1.0, 2.0, 10.0]);
        assert_eq!(stats.min_ms, 1.0);
        assert_eq!(stats.median_ms, 2.5);
        assert_eq!(stats.mean_ms, 4.0);
        assert_eq!(stats.p95_ms, 10.0);
        assert_eq!(stats.max_ms, 10.0);
    }

    #[test]
    fn figures_are_rounded_to_microseconds() {
        let stats = AggregateStats::from_samples(&[0.123_456, 0.123_456]);
        assert_eq!(stats.min_ms, 0.123);
        assert_eq!(stats.mean_ms, 0.123);
        assert_eq!(round_ms(1.2346), 1.235);
    }
}
