//! Surrogate models and random-restart hyperparameter optimization.
//!
//! Restarts run sequentially, on a shared-memory thread pool, or across a
//! pool of `at-restart-worker` processes spawned for a single call.

pub mod coordinator;
pub mod dense;
pub mod engine;
pub mod kernel;
pub mod model;
pub mod pool;
pub mod restart;
pub mod wire;
pub mod worker;

pub use coordinator::{select_best, AssembledModel, RestartCoordinator, Selection};
pub use dense::DenseGpEngine;
pub use engine::{
    build_engine, inducing_count, FitOptions, FittedRegression, KernelFit, NoiseTerm, Prediction,
    RegressionEngine,
};
pub use kernel::{KernelSpec, LcmKernel};
pub use model::{build_model, LcmModel, SingleTaskModel, SurrogateModel, TrainingSummary};
pub use pool::{PoolConfig, WorkerPool, WORKER_BINARY, WORKER_ENV};
pub use wire::{
    ModelDefinition, RestartBundle, RestartOutcome, RestartResult, SeedPolicy, WorkerReply,
};
