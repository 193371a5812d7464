//! Regression engine seam.
//!
//! The surrogate model and restart coordinator only ever talk to a
//! [`RegressionEngine`]: it fits kernel hyperparameters from a given start
//! and builds a joint regression once the winning hyperparameters are known.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use at_types::{EngineError, EngineKind, Point};

use crate::dense::DenseGpEngine;
use crate::kernel::LcmKernel;

/// Noiseless posterior at one point of one task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub mean: f64,
    pub variance: f64,
}

/// Result of one local hyperparameter optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelFit {
    pub params: Vec<f64>,
    pub nll: f64,
    pub iterations: usize,
}

/// Gaussian noise term attached to one task in the joint regression.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseTerm {
    pub task: usize,
    pub variance: f64,
}

/// Per-call settings the engine honours while fitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitOptions {
    pub max_iters: usize,
    /// Sparse approximation with this many inducing points.
    pub inducing: Option<usize>,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iters: 15_000,
            inducing: None,
        }
    }
}

/// Opaque numeric capability backing the surrogate models.
pub trait RegressionEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run a local optimization of the kernel's hyperparameters starting from
    /// `start`, returning the optimum and its negative log-likelihood.
    fn optimize_kernel(
        &self,
        start: &LcmKernel,
        x: &[Vec<Point>],
        y: &[Vec<f64>],
        options: &FitOptions,
    ) -> Result<KernelFit, EngineError>;

    /// Fit the joint multi-output regression with `kernel` held fixed.
    fn fit_joint(
        &self,
        kernel: &LcmKernel,
        x: &[Vec<Point>],
        y: &[Vec<f64>],
        noise: &[NoiseTerm],
        options: &FitOptions,
    ) -> Result<Arc<dyn FittedRegression>, EngineError>;
}

/// A fitted joint regression.
pub trait FittedRegression: Send + Sync + fmt::Debug {
    fn kernel(&self) -> &LcmKernel;

    fn predict_noiseless(&self, point: &[f64], task: usize) -> Prediction;
}

/// Resolve an engine tag to its implementation.
pub fn build_engine(kind: EngineKind) -> Arc<dyn RegressionEngine> {
    match kind {
        EngineKind::Dense => Arc::new(DenseGpEngine::new()),
    }
}

/// Inducing point count for the sparse approximation over `n` samples:
/// `min(n, round(3·√n))`.
pub fn inducing_count(n: usize) -> usize {
    n.min((3.0 * (n as f64).sqrt()).round() as usize)
}
