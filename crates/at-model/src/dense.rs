//! Exact dense GP engine.
//!
//! Targets are standardized per task before fitting. The negative
//! log-likelihood is evaluated through a Cholesky factor of `K + Σ`, and the
//! hyperparameters are searched with argmin's Nelder-Mead solver in their
//! (log-)parameter space. In sparse mode an evenly strided subset of the combined samples
//! acts as the inducing set.

use argmin::core::{CostFunction, Error as ArgminError, Executor, State};
use argmin::solver::neldermead::NelderMead;
use nalgebra::{DMatrix, DVector};
use std::f64::consts::PI;
use std::sync::Arc;

use at_types::{EngineError, Point};

use crate::engine::{
    FitOptions, FittedRegression, KernelFit, NoiseTerm, Prediction, RegressionEngine,
};
use crate::kernel::{KernelSpec, LcmKernel};

/// Added to the covariance diagonal for numerical stability.
const JITTER: f64 = 1e-8;
/// Standard deviation of simplex costs at which Nelder-Mead stops.
const SD_TOLERANCE: f64 = 1e-9;
/// Initial simplex edge length in parameter space.
const SIMPLEX_STEP: f64 = 0.5;

#[derive(Debug, Clone, Default)]
pub struct DenseGpEngine;

impl DenseGpEngine {
    pub fn new() -> Self {
        Self
    }
}

/// Flattened, standardized training samples.
#[derive(Debug, Clone)]
struct TrainingSet {
    points: Vec<(usize, Point)>,
    targets: DVector<f64>,
    /// Per-task `(mean, std)` used to standardize targets.
    scales: Vec<(f64, f64)>,
}

impl TrainingSet {
    fn build(
        x: &[Vec<Point>],
        y: &[Vec<f64>],
        inducing: Option<usize>,
    ) -> Result<Self, EngineError> {
        let scales: Vec<(f64, f64)> = y.iter().map(|values| standardization(values)).collect();

        let mut points = Vec::new();
        let mut targets = Vec::new();
        for (task, (xs, ys)) in x.iter().zip(y).enumerate() {
            let (mean, std) = scales[task];
            for (point, value) in xs.iter().zip(ys) {
                points.push((task, point.clone()));
                targets.push((value - mean) / std);
            }
        }
        if points.is_empty() {
            return Err(EngineError::NoData);
        }

        if let Some(m) = inducing {
            let n = points.len();
            if m > 0 && m < n {
                let keep: Vec<usize> = (0..m).map(|k| k * n / m).collect();
                points = keep.iter().map(|&i| points[i].clone()).collect();
                targets = keep.iter().map(|&i| targets[i]).collect();
            }
        }

        Ok(Self {
            points,
            targets: DVector::from_vec(targets),
            scales,
        })
    }

    fn len(&self) -> usize {
        self.points.len()
    }

    fn covariance(&self, kernel: &LcmKernel, noise: &[f64]) -> DMatrix<f64> {
        let n = self.len();
        DMatrix::from_fn(n, n, |i, j| {
            let (ti, xi) = &self.points[i];
            let (tj, xj) = &self.points[j];
            let k = kernel.covariance(xi, *ti, xj, *tj);
            if i == j {
                k + noise[*ti] + JITTER
            } else {
                k
            }
        })
    }

    fn negative_log_likelihood(&self, kernel: &LcmKernel) -> Result<f64, EngineError> {
        let k = self.covariance(kernel, &kernel.noise_variances());
        let cholesky = k.cholesky().ok_or(EngineError::NotPositiveDefinite)?;
        let alpha = cholesky.solve(&self.targets);
        let log_det: f64 = cholesky.l_dirty().diagonal().iter().map(|d| d.ln()).sum();
        let nll =
            0.5 * self.targets.dot(&alpha) + log_det + 0.5 * self.len() as f64 * (2.0 * PI).ln();
        if nll.is_finite() {
            Ok(nll)
        } else {
            Err(EngineError::NonFinite)
        }
    }
}

fn standardization(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 1.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();
    if std > 1e-12 {
        (mean, std)
    } else {
        (mean, 1.0)
    }
}

impl RegressionEngine for DenseGpEngine {
    fn name(&self) -> &'static str {
        "dense"
    }

    fn optimize_kernel(
        &self,
        start: &LcmKernel,
        x: &[Vec<Point>],
        y: &[Vec<f64>],
        options: &FitOptions,
    ) -> Result<KernelFit, EngineError> {
        let set = TrainingSet::build(x, y, options.inducing)?;
        let cost = LikelihoodCost {
            set: &set,
            spec: start.spec(),
        };
        let solver = NelderMead::new(initial_simplex(start.params()))
            .with_sd_tolerance(SD_TOLERANCE)
            .map_err(|e| EngineError::Optimizer(e.to_string()))?;

        let result = Executor::new(cost, solver)
            .configure(|state| state.max_iters(options.max_iters as u64))
            .run()
            .map_err(|e| EngineError::Optimizer(e.to_string()))?;
        let state = result.state();
        let iterations = state.get_iter() as usize;
        let nll = state.get_best_cost();

        match state.get_best_param() {
            Some(params) if nll.is_finite() => Ok(KernelFit {
                params: params.clone(),
                nll,
                iterations,
            }),
            _ => Err(EngineError::DidNotConverge { iterations }),
        }
    }

    fn fit_joint(
        &self,
        kernel: &LcmKernel,
        x: &[Vec<Point>],
        y: &[Vec<f64>],
        noise: &[NoiseTerm],
        options: &FitOptions,
    ) -> Result<Arc<dyn FittedRegression>, EngineError> {
        let set = TrainingSet::build(x, y, options.inducing)?;

        let mut variances = kernel.noise_variances();
        for term in noise {
            if let Some(slot) = variances.get_mut(term.task) {
                *slot = term.variance;
            }
        }

        let k = set.covariance(kernel, &variances);
        let cholesky = k.cholesky().ok_or(EngineError::NotPositiveDefinite)?;
        let alpha = cholesky.solve(&set.targets);

        Ok(Arc::new(DenseFit {
            kernel: kernel.clone(),
            cholesky,
            alpha,
            set,
        }))
    }
}

/// Joint regression fitted by [`DenseGpEngine`].
struct DenseFit {
    kernel: LcmKernel,
    cholesky: nalgebra::linalg::Cholesky<f64, nalgebra::Dyn>,
    alpha: DVector<f64>,
    set: TrainingSet,
}

impl std::fmt::Debug for DenseFit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DenseFit")
            .field("kernel", &self.kernel)
            .field("samples", &self.set.len())
            .finish()
    }
}

impl FittedRegression for DenseFit {
    fn kernel(&self) -> &LcmKernel {
        &self.kernel
    }

    fn predict_noiseless(&self, point: &[f64], task: usize) -> Prediction {
        let k_star = DVector::from_fn(self.set.len(), |i, _| {
            let (ti, xi) = &self.set.points[i];
            self.kernel.covariance(point, task, xi, *ti)
        });

        let mean = k_star.dot(&self.alpha);
        let v = self.cholesky.solve(&k_star);
        let variance = (self.kernel.prior_variance(task) - k_star.dot(&v)).max(0.0);

        let (offset, scale) = self.set.scales.get(task).copied().unwrap_or((0.0, 1.0));
        Prediction {
            mean: mean * scale + offset,
            variance: variance * scale * scale,
        }
    }
}

/// Negative log-likelihood of a training set as a function of the kernel
/// parameters. Layouts the kernel rejects and failed factorizations cost
/// `+inf`, never NaN.
struct LikelihoodCost<'a> {
    set: &'a TrainingSet,
    spec: KernelSpec,
}

impl CostFunction for LikelihoodCost<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> Result<Self::Output, ArgminError> {
        Ok(LcmKernel::new(self.spec, params.clone())
            .and_then(|kernel| self.set.negative_log_likelihood(&kernel))
            .unwrap_or(f64::INFINITY))
    }
}

/// `start` plus one vertex per coordinate, offset by [`SIMPLEX_STEP`].
fn initial_simplex(start: &[f64]) -> Vec<Vec<f64>> {
    let mut simplex = Vec::with_capacity(start.len() + 1);
    simplex.push(start.to_vec());
    for i in 0..start.len() {
        let mut vertex = start.to_vec();
        vertex[i] += SIMPLEX_STEP;
        simplex.push(vertex);
    }
    simplex
}
