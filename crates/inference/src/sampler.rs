//! Token samplers over a probability distribution.

use ndarray::ArrayView1;

/// Picks the next token id from a normalized distribution over the vocabulary.
pub trait Sampler {
    fn sample(&mut self, probs: ArrayView1<'_, f32>) -> usize;
}

/// Multinomial draw: id `i` is returned with probability `probs[i]`.
#[derive(Debug, Clone)]
pub struct MultinomialSampler {
    rng: fastrand::Rng,
}

impl MultinomialSampler {
    /// Seeded from process entropy; repeated runs differ.
    pub fn new() -> Self {
        Self {
            rng: fastrand::Rng::new(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: fastrand::Rng::with_seed(seed),
        }
    }
}

impl Default for MultinomialSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for MultinomialSampler {
    fn sample(&mut self, probs: ArrayView1<'_, f32>) -> usize {
        let rand_val: f32 = self.rng.f32();
        let mut cumsum = 0.0;
        for (idx, &prob) in probs.iter().enumerate() {
            cumsum += prob;
            if rand_val < cumsum {
                return idx;
            }
        }
        // Rounding left the total just under `rand_val`.
        probs
            .iter()
            .enumerate()
            .filter(|&(_, &p)| p > 0.0)
            .map(|(idx, _)| idx)
            .last()
            .unwrap_or_else(|| probs.len().saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn point_mass_is_always_drawn() {
        let mut sampler = MultinomialSampler::with_seed(42);
        let probs = array![0.0f32, 0.0, 1.0, 0.0];
        for _ in 0..100 {
            assert_eq!(sampler.sample(probs.view()), 2);
        }
    }

    #[test]
    fn zero_probability_ids_are_never_drawn() {
        let mut sampler = MultinomialSampler::with_seed(7);
        let probs = array![0.5f32, 0.0, 0.5];
        for _ in 0..500 {
            assert_ne!(sampler.sample(probs.view()), 1);
        }
    }

    #[test]
    fn draws_follow_the_distribution() {
        let mut sampler = MultinomialSampler::with_seed(3);
        let probs = array![0.25f32, 0.75];
        let ones = (0..4000).filter(|_| sampler.sample(probs.view()) == 1).count();
        let frac = ones as f32 / 4000.0;
        assert!((frac - 0.75).abs() < 0.05, "observed {}", frac);
    }

    #[test]
    fn same_seed_same_draws() {
        let probs = array![0.1f32, 0.2, 0.3, 0.4];
        let mut a = MultinomialSampler::with_seed(9);
        let mut b = MultinomialSampler::with_seed(9);
        let xs: Vec<usize> = (0..50).map(|_| a.sample(probs.view())).collect();
        let ys: Vec<usize> = (0..50).map(|_| b.sample(probs.view())).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn short_total_falls_back_to_last_supported_id() {
        let mut sampler = MultinomialSampler::with_seed(1);
        let probs = array![0.0f32, 1e-12, 0.0];
        for _ in 0..10 {
            assert_eq!(sampler.sample(probs.view()), 1);
        }
    }
}
