//! Gaussian sampling for PVW error generation

use rand::Rng;
use rand::RngCore;

use crate::math::modular::T;

/// Discrete Gaussian sampler for PVW noise terms.
pub struct GaussianSampler {
    sigma: f64,
}

impl GaussianSampler {
    /// Create a sampler with the given standard deviation.
    pub fn new(sigma: f64) -> Self {
        Self { sigma }
    }

    /// Sample from the discrete Gaussian using the Box-Muller transform.
    pub fn sample<R: RngCore>(&self, rng: &mut R) -> i64 {
        let u1: f64 = rng.gen_range(0.0001..1.0);
        let u2: f64 = rng.gen_range(0.0..1.0);

        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        (z * self.sigma).round() as i64
    }

    /// Sample n values centered in Z_t.
    pub fn sample_vec_centered<R: RngCore>(&self, n: usize, rng: &mut R) -> Vec<u64> {
        (0..n)
            .map(|_| {
                let sample = self.sample(rng);
                if sample >= 0 {
                    (sample as u64) % T
                } else {
                    T - ((-sample) as u64 % T)
                }
            })
            .collect()
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn test_samples_stay_small() {
        let sampler = GaussianSampler::new(1.3);
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        for _ in 0..1000 {
            // 10 sigma; astronomically unlikely to fail
            assert!(sampler.sample(&mut rng).abs() < 13);
        }
    }

    #[test]
    fn test_centered_range() {
        let sampler = GaussianSampler::new(1.3);
        let mut rng = ChaCha20Rng::seed_from_u64(8);
        for v in sampler.sample_vec_centered(1000, &mut rng) {
            assert!(v < T);
            // values land near 0 or near t
            assert!(v < 20 || v > T - 20);
        }
    }
}
