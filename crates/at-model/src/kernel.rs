//! Linear model of coregionalization (LCM) kernel.
//!
//! `k((x, i), (x', j)) = Σ_q B_q[i, j] · rbf_q(x, x')` with
//! `B_q = w_q w_qᵀ + diag(κ_q)` and one ARD RBF per latent process `q`.
//! Each task additionally carries its own Gaussian noise variance.
//!
//! Parameter layout, per latent process: `input_dim` log-lengthscales,
//! `num_tasks` mixing weights, `num_tasks` log task variances. The vector
//! ends with `num_tasks` log noise variances.

use rand::Rng;
use serde::{Deserialize, Serialize};

use at_types::EngineError;

const LOG_LENGTHSCALE_BOUNDS: (f64, f64) = (-7.0, 7.0);
const LOG_VARIANCE_BOUNDS: (f64, f64) = (-18.0, 6.0);

/// Shape of an LCM kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSpec {
    pub input_dim: usize,
    pub num_tasks: usize,
    pub latent: usize,
}

impl KernelSpec {
    pub fn new(input_dim: usize, num_tasks: usize, latent: usize) -> Self {
        Self {
            input_dim,
            num_tasks,
            latent,
        }
    }

    fn block_len(&self) -> usize {
        self.input_dim + 2 * self.num_tasks
    }

    fn noise_offset(&self) -> usize {
        self.latent * self.block_len()
    }

    /// Length of the flat hyperparameter vector.
    pub fn param_len(&self) -> usize {
        self.noise_offset() + self.num_tasks
    }
}

/// An LCM kernel with concrete hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LcmKernel {
    spec: KernelSpec,
    params: Vec<f64>,
}

impl LcmKernel {
    pub fn new(spec: KernelSpec, params: Vec<f64>) -> Result<Self, EngineError> {
        if params.len() != spec.param_len() {
            return Err(EngineError::ParameterLength {
                expected: spec.param_len(),
                actual: params.len(),
            });
        }
        Ok(Self { spec, params })
    }

    /// A fresh kernel with randomized hyperparameters drawn from `rng`.
    pub fn random<R: Rng>(spec: KernelSpec, rng: &mut R) -> Self {
        let mut params = Vec::with_capacity(spec.param_len());
        for _ in 0..spec.latent {
            for _ in 0..spec.input_dim {
                params.push(rng.random_range(-2.3..0.7));
            }
            for _ in 0..spec.num_tasks {
                params.push(rng.random_range(-1.0..1.0));
            }
            for _ in 0..spec.num_tasks {
                params.push(rng.random_range(-4.6..-0.7));
            }
        }
        for _ in 0..spec.num_tasks {
            params.push(rng.random_range(-9.2..-2.3));
        }
        Self { spec, params }
    }

    pub fn spec(&self) -> KernelSpec {
        self.spec
    }

    pub fn params(&self) -> &[f64] {
        &self.params
    }

    pub fn into_params(self) -> Vec<f64> {
        self.params
    }

    fn block(&self, q: usize) -> &[f64] {
        let len = self.spec.block_len();
        &self.params[q * len..(q + 1) * len]
    }

    pub fn lengthscale(&self, q: usize, d: usize) -> f64 {
        let (lo, hi) = LOG_LENGTHSCALE_BOUNDS;
        self.block(q)[d].clamp(lo, hi).exp()
    }

    pub fn mixing(&self, q: usize, task: usize) -> f64 {
        self.block(q)[self.spec.input_dim + task]
    }

    pub fn task_variance(&self, q: usize, task: usize) -> f64 {
        let (lo, hi) = LOG_VARIANCE_BOUNDS;
        self.block(q)[self.spec.input_dim + self.spec.num_tasks + task]
            .clamp(lo, hi)
            .exp()
    }

    pub fn noise_variance(&self, task: usize) -> f64 {
        let (lo, hi) = LOG_VARIANCE_BOUNDS;
        self.params[self.spec.noise_offset() + task]
            .clamp(lo, hi)
            .exp()
    }

    pub fn noise_variances(&self) -> Vec<f64> {
        (0..self.spec.num_tasks)
            .map(|task| self.noise_variance(task))
            .collect()
    }

    /// `B_q[a, b]`.
    pub fn coregionalization(&self, q: usize, a: usize, b: usize) -> f64 {
        let shared = self.mixing(q, a) * self.mixing(q, b);
        if a == b {
            shared + self.task_variance(q, a)
        } else {
            shared
        }
    }

    /// Noiseless covariance between `(xa, ta)` and `(xb, tb)`.
    pub fn covariance(&self, xa: &[f64], ta: usize, xb: &[f64], tb: usize) -> f64 {
        (0..self.spec.latent)
            .map(|q| {
                let r2: f64 = xa
                    .iter()
                    .zip(xb)
                    .enumerate()
                    .map(|(d, (a, b))| {
                        let diff = (a - b) / self.lengthscale(q, d);
                        diff * diff
                    })
                    .sum();
                self.coregionalization(q, ta, tb) * (-0.5 * r2).exp()
            })
            .sum()
    }

    /// Prior variance at any point of `task`.
    pub fn prior_variance(&self, task: usize) -> f64 {
        (0..self.spec.latent)
            .map(|q| self.coregionalization(q, task, task))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn param_len_matches_layout() {
        let spec = KernelSpec::new(3, 2, 2);
        // per q: 3 lengthscales + 2 weights + 2 variances; then 2 noise terms
        assert_eq!(spec.param_len(), 2 * 7 + 2);
        let kernel = LcmKernel::random(spec, &mut ChaCha8Rng::seed_from_u64(1));
        assert_eq!(kernel.params().len(), spec.param_len());
    }

    #[test]
    fn random_kernel_is_seed_deterministic() {
        let spec = KernelSpec::new(2, 3, 3);
        let a = LcmKernel::random(spec, &mut ChaCha8Rng::seed_from_u64(9));
        let b = LcmKernel::random(spec, &mut ChaCha8Rng::seed_from_u64(9));
        let c = LcmKernel::random(spec, &mut ChaCha8Rng::seed_from_u64(10));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn rejects_wrong_length() {
        let spec = KernelSpec::new(1, 1, 1);
        let err = LcmKernel::new(spec, vec![0.0; 3]).unwrap_err();
        assert_eq!(
            err,
            EngineError::ParameterLength {
                expected: 4,
                actual: 3
            }
        );
    }

    #[test]
    fn covariance_decodes_layout() {
        let spec = KernelSpec::new(1, 2, 1);
        // lengthscale 1, w = (1, 2), kappa = (e^0, e^0), noise = (e^-2, e^-3)
        let kernel = LcmKernel::new(spec, vec![0.0, 1.0, 2.0, 0.0, 0.0, -2.0, -3.0]).unwrap();

        assert!((kernel.coregionalization(0, 0, 1) - 2.0).abs() < 1e-12);
        assert!((kernel.prior_variance(1) - 5.0).abs() < 1e-12);
        assert!((kernel.covariance(&[0.0], 0, &[0.0], 0) - 2.0).abs() < 1e-12);

        let far = kernel.covariance(&[0.0], 0, &[1.0], 1);
        assert!((far - 2.0 * (-0.5f64).exp()).abs() < 1e-12);

        let noise = kernel.noise_variances();
        assert!((noise[0] - (-2.0f64).exp()).abs() < 1e-12);
        assert!((noise[1] - (-3.0f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn extreme_parameters_are_clamped() {
        let spec = KernelSpec::new(1, 1, 1);
        let kernel = LcmKernel::new(spec, vec![50.0, 0.0, -100.0, 100.0]).unwrap();
        assert!(kernel.lengthscale(0, 0).is_finite());
        assert!(kernel.task_variance(0, 0) > 0.0);
        assert!(kernel.noise_variance(0).is_finite());
    }
}
