//! Tuning options: variant selection, restart fan-out and search settings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::TuneResult;

/// Surrogate model variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Multi-task linear coregionalization model.
    #[default]
    Lcm,
    /// Plain GP; requires data with exactly one task.
    SingleTask,
}

/// Regression engine backing the surrogate model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Exact dense GP; hyperparameters searched with argmin's Nelder-Mead.
    #[default]
    Dense,
}

/// Initial-design sampler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplerKind {
    Random,
    #[default]
    LatinHypercube,
}

/// Acquisition / search engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
    #[default]
    ExpectedImprovement,
    Random,
}

/// How model restarts are fanned out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One worker process per pool member, spawned for a single training call.
    Distributed,
    /// A fixed-size thread pool inside this process.
    SharedMemory,
    /// One restart at a time on the calling thread.
    #[default]
    Sequential,
}

/// Top-level configuration for a tuning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningOptions {
    pub model: ModelKind,
    pub engine: EngineKind,
    pub sampler: SamplerKind,
    pub search: SearchKind,
    pub execution: ExecutionMode,

    /// Number of randomized local optimizations per training call.
    pub model_restarts: usize,
    /// Worker processes in distributed mode.
    pub model_restart_processes: usize,
    /// Threads in shared-memory mode. Also the stride of the seed policy.
    pub model_restart_threads: usize,
    /// Iteration cap for one local optimization.
    pub model_max_iters: usize,
    /// Latent processes `Q`; `None` means one per task.
    pub model_latent: Option<usize>,
    pub model_sparse: bool,
    /// Inducing point count for sparse mode; derived from the sample count when `None`.
    pub model_inducing: Option<usize>,
    /// Start restart 0 from the previous fit's hyperparameters.
    pub model_warm_start: bool,

    /// Candidates scored per task per search round.
    pub search_candidates: usize,
    /// Fraction of candidates drawn uniformly instead of around the incumbent.
    pub search_exploration: f64,

    /// Rejection-sampling budget per requested point.
    pub sample_max_attempts: usize,

    /// Global seed for samplers, search and restarts.
    pub seed: Option<u64>,

    /// Worker executable for distributed mode.
    pub worker_program: Option<PathBuf>,
}

impl Default for TuningOptions {
    fn default() -> Self {
        Self {
            model: ModelKind::Lcm,
            engine: EngineKind::Dense,
            sampler: SamplerKind::LatinHypercube,
            search: SearchKind::ExpectedImprovement,
            execution: ExecutionMode::Sequential,
            model_restarts: 1,
            model_restart_processes: 1,
            model_restart_threads: 1,
            model_max_iters: 15_000,
            model_latent: None,
            model_sparse: false,
            model_inducing: None,
            model_warm_start: true,
            search_candidates: 256,
            search_exploration: 0.3,
            sample_max_attempts: 1_000,
            seed: None,
            worker_program: None,
        }
    }
}

impl TuningOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(text: &str) -> TuneResult<Self> {
        let options: Self = serde_json::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    pub fn load(path: impl AsRef<Path>) -> TuneResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> TuneResult<()> {
        if self.model_restarts == 0 {
            return Err(crate::config_error!("model_restarts must be at least 1"));
        }
        if self.model_restart_processes == 0 || self.model_restart_threads == 0 {
            return Err(crate::config_error!(
                "model_restart_processes and model_restart_threads must be at least 1"
            ));
        }
        if self.model_latent == Some(0) {
            return Err(crate::config_error!("model_latent must be at least 1"));
        }
        if self.search_candidates == 0 {
            return Err(crate::config_error!("search_candidates must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.search_exploration) {
            return Err(crate::config_error!(
                "search_exploration must lie in [0, 1], got {}",
                self.search_exploration
            ));
        }
        Ok(())
    }

    pub fn with_model(mut self, model: ModelKind) -> Self {
        self.model = model;
        self
    }

    pub fn with_execution(mut self, mode: ExecutionMode) -> Self {
        self.execution = mode;
        self
    }

    pub fn with_restarts(mut self, n: usize) -> Self {
        self.model_restarts = n;
        self
    }

    pub fn with_processes(mut self, n: usize) -> Self {
        self.model_restart_processes = n;
        self
    }

    pub fn with_threads(mut self, n: usize) -> Self {
        self.model_restart_threads = n;
        self
    }

    pub fn with_max_iters(mut self, n: usize) -> Self {
        self.model_max_iters = n;
        self
    }

    pub fn with_latent(mut self, q: usize) -> Self {
        self.model_latent = Some(q);
        self
    }

    pub fn with_sparse(mut self, inducing: Option<usize>) -> Self {
        self.model_sparse = true;
        self.model_inducing = inducing;
        self
    }

    pub fn with_sampler(mut self, sampler: SamplerKind) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_search(mut self, search: SearchKind) -> Self {
        self.search = search;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_worker_program(mut self, path: impl Into<PathBuf>) -> Self {
        self.worker_program = Some(path.into());
        self
    }
}
