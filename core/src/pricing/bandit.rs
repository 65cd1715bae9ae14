//! Arm selection: cold start, epsilon exploration, then UCB1

use super::model::{Arm, Selection};
use rand::Rng;

/// `mean + sqrt(2 ln N / n)`; infinite for an unpulled arm
pub fn ucb1(arm: &Arm, total_pulls: u64) -> f64 {
    if arm.pulls == 0 {
        return f64::INFINITY;
    }
    let exploration = (2.0 * (total_pulls.max(1) as f64).ln() / arm.pulls as f64).sqrt();
    arm.mean_reward() + exploration
}

/// Index of the arm to pull next
///
/// Callers guarantee `arms` is non-empty.
pub fn choose<R: Rng>(arms: &[Arm], epsilon: f64, rng: &mut R) -> (usize, Selection) {
    let cold: Vec<usize> = arms
        .iter()
        .enumerate()
        .filter(|(_, arm)| arm.pulls == 0)
        .map(|(i, _)| i)
        .collect();
    if !cold.is_empty() {
        return (cold[rng.gen_range(0..cold.len())], Selection::ColdStart);
    }

    if rng.gen::<f64>() < epsilon {
        return (rng.gen_range(0..arms.len()), Selection::Explore);
    }

    let total: u64 = arms.iter().map(|arm| arm.pulls).sum();
    (argmax(arms, |arm| ucb1(arm, total)), Selection::Exploit)
}

/// First index with the highest value
pub fn argmax(arms: &[Arm], value: impl Fn(&Arm) -> f64) -> usize {
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (i, arm) in arms.iter().enumerate() {
        let v = value(arm);
        if v > best_value {
            best = i;
            best_value = v;
        }
    }
    best
}
