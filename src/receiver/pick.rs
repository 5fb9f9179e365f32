//! Weighted selection.

/// Pick a candidate index for a uniform `draw` in `[0, 1)`.
///
/// The draw is scaled to `[0, max(1, total))`, so when the weights sum to
/// less than one there is a chance nothing is picked. Candidate `i` owns
/// the half-open interval `[w0 + .. + w(i-1), w0 + .. + wi)`; zero-weight
/// candidates therefore never win.
#[must_use]
pub fn pick_index(weights: &[f64], draw: f64) -> Option<usize> {
    let total: f64 = weights.iter().sum();
    let value = draw * total.max(1.0);
    let mut running = 0.0;
    for (index, weight) in weights.iter().enumerate() {
        running += weight;
        if value < running {
            return Some(index);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sole_certain_candidate_always_wins() {
        for draw in [0.0, 0.25, 0.5, 0.999_999] {
            assert_eq!(pick_index(&[1.0], draw), Some(0));
        }
    }

    #[test]
    fn boundaries_are_half_open() {
        let weights = [0.5, 0.5, 1.0];
        // Scaled to [0, 2).
        assert_eq!(pick_index(&weights, 0.0), Some(0));
        assert_eq!(pick_index(&weights, 0.24), Some(0));
        assert_eq!(pick_index(&weights, 0.25), Some(1));
        assert_eq!(pick_index(&weights, 0.5), Some(2));
        assert_eq!(pick_index(&weights, 0.99), Some(2));
    }

    #[test]
    fn small_totals_may_pick_nothing() {
        assert_eq!(pick_index(&[0.3], 0.29), Some(0));
        assert_eq!(pick_index(&[0.3], 0.3), None);
        assert_eq!(pick_index(&[0.0, 0.0], 0.0), None);
        assert_eq!(pick_index(&[], 0.0), None);
    }

    #[test]
    fn zero_weights_are_skipped() {
        assert_eq!(pick_index(&[0.0, 1.0], 0.0), Some(1));
    }

    #[test]
    fn fixed_draw_sequence_is_deterministic() {
        let weights = [1.0, 2.0, 1.0];
        let draws = [0.1, 0.3, 0.6, 0.9];
        let picks: Vec<_> = draws.iter().map(|d| pick_index(&weights, *d)).collect();
        assert_eq!(picks, vec![Some(0), Some(1), Some(1), Some(2)]);
    }
}
