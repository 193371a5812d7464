//! Surrogate models.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use at_types::{
    validation_error, Dataset, DatasetError, ModelError, ModelKind, TuneResult, TuningOptions,
};

use crate::coordinator::RestartCoordinator;
use crate::engine::{
    build_engine, inducing_count, FitOptions, FittedRegression, NoiseTerm, Prediction,
    RegressionEngine,
};
use crate::kernel::{KernelSpec, LcmKernel};
use crate::wire::{ModelDefinition, SeedPolicy};

/// A trainable surrogate of the objective.
pub trait SurrogateModel: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Fit the model to `data`, replacing any previous state.
    fn train(&mut self, data: &Dataset) -> TuneResult<()>;

    /// Incorporate `delta` into the training data.
    ///
    /// `retrain = false` asks for a cheap incremental update; implementations
    /// without one fall back to a full retrain.
    fn update(&mut self, delta: &Dataset, retrain: bool) -> TuneResult<()>;

    /// Noiseless posterior mean and variance at `point` for task `task`.
    fn predict(&self, point: &[f64], task: usize) -> TuneResult<Prediction>;

    fn is_trained(&self) -> bool;
}

/// Summary of the restart search behind the current state.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub restarts: usize,
    pub failed: usize,
    pub best_restart: usize,
    pub nll: f64,
}

#[derive(Debug, Clone)]
struct TrainedState {
    kernel: LcmKernel,
    noise: Vec<NoiseTerm>,
    fitted: Arc<dyn FittedRegression>,
    data: Dataset,
    summary: TrainingSummary,
}

impl TrainedState {
    fn predict(&self, point: &[f64], task: usize) -> TuneResult<Prediction> {
        let spec = self.kernel.spec();
        if task >= spec.num_tasks {
            return Err(ModelError::TaskOutOfRange {
                task,
                tasks: spec.num_tasks,
            }
            .into());
        }
        if point.len() != spec.input_dim {
            return Err(DatasetError::DimensionMismatch {
                expected: spec.input_dim,
                actual: point.len(),
            }
            .into());
        }
        Ok(self.fitted.predict_noiseless(point, task))
    }
}

/// Run the restart search on `data` and assemble the winning model.
fn fit_state(
    coordinator: &RestartCoordinator,
    options: &TuningOptions,
    data: &Dataset,
    latent: usize,
    previous: Option<TrainedState>,
) -> TuneResult<TrainedState> {
    data.validate()?;
    let input_dim = parameter_dim(data)?;

    let spec = KernelSpec::new(input_dim, data.task_count(), latent);
    let warm_start = previous
        .filter(|_| options.model_warm_start)
        .filter(|state| state.kernel.spec() == spec)
        .map(|state| state.kernel.into_params());
    let inducing = if options.model_sparse {
        Some(
            options
                .model_inducing
                .unwrap_or_else(|| inducing_count(data.total_samples())),
        )
    } else {
        None
    };

    let definition = ModelDefinition {
        engine: options.engine,
        kernel: spec,
        warm_start,
        seed_policy: SeedPolicy::new(options.seed, options.model_restart_threads),
        fit: FitOptions {
            max_iters: options.model_max_iters,
            inducing,
        },
    };
    debug!(
        tasks = spec.num_tasks,
        latent,
        input_dim,
        inducing = ?inducing,
        warm_start = definition.warm_start.is_some(),
        "training surrogate"
    );

    let selection = coordinator.optimize(&definition, data, options.model_restarts)?;
    let assembled = coordinator.assemble(&selection.best, &definition, data)?;

    let summary = TrainingSummary {
        restarts: options.model_restarts,
        failed: selection.failures.len(),
        best_restart: selection.best.restart,
        nll: selection.best.nll,
    };
    info!(
        samples = data.total_samples(),
        best_restart = summary.best_restart,
        failed = summary.failed,
        nll = summary.nll,
        "surrogate trained"
    );

    Ok(TrainedState {
        kernel: assembled.kernel,
        noise: assembled.noise,
        fitted: assembled.fitted,
        data: data.clone(),
        summary,
    })
}

/// Common length of every parameter vector in `data`.
fn parameter_dim(data: &Dataset) -> Result<usize, DatasetError> {
    let mut points = data.parameters().iter().flatten();
    let expected = points
        .next()
        .map(Vec::len)
        .ok_or_else(|| DatasetError::Incomplete {
            message: "no parameter samples to train on".into(),
        })?;
    match points.find(|point| point.len() != expected) {
        Some(point) => Err(DatasetError::DimensionMismatch {
            expected,
            actual: point.len(),
        }),
        None => Ok(expected),
    }
}

/// Merge `delta` into the data a state was trained on.
fn merged_data(state: Option<&TrainedState>, delta: &Dataset) -> TuneResult<Dataset> {
    let mut data = state.map(|s| s.data.clone()).unwrap_or_default();
    data.merge(delta)?;
    Ok(data)
}

/// Multi-task model coupling tasks through a linear model of
/// coregionalization. Hyperparameters come from the restart coordinator.
#[derive(Debug)]
pub struct LcmModel {
    coordinator: RestartCoordinator,
    options: TuningOptions,
    state: Option<TrainedState>,
}

impl LcmModel {
    pub fn new(options: &TuningOptions) -> Self {
        Self::with_engine(build_engine(options.engine), options)
    }

    pub fn with_engine(engine: Arc<dyn RegressionEngine>, options: &TuningOptions) -> Self {
        Self {
            coordinator: RestartCoordinator::from_options(engine, options),
            options: options.clone(),
            state: None,
        }
    }

    pub fn kernel(&self) -> Option<&LcmKernel> {
        self.state.as_ref().map(|s| &s.kernel)
    }

    pub fn noise(&self) -> Option<&[NoiseTerm]> {
        self.state.as_ref().map(|s| s.noise.as_slice())
    }

    pub fn summary(&self) -> Option<&TrainingSummary> {
        self.state.as_ref().map(|s| &s.summary)
    }
}

impl SurrogateModel for LcmModel {
    fn name(&self) -> &'static str {
        "lcm"
    }

    fn train(&mut self, data: &Dataset) -> TuneResult<()> {
        let latent = self.options.model_latent.unwrap_or(data.task_count()).max(1);
        let previous = self.state.take();
        self.state = Some(fit_state(
            &self.coordinator,
            &self.options,
            data,
            latent,
            previous,
        )?);
        Ok(())
    }

    fn update(&mut self, delta: &Dataset, retrain: bool) -> TuneResult<()> {
        if !retrain {
            debug!("no incremental update for lcm model, retraining");
        }
        let data = merged_data(self.state.as_ref(), delta)?;
        self.train(&data)
    }

    fn predict(&self, point: &[f64], task: usize) -> TuneResult<Prediction> {
        self.state
            .as_ref()
            .ok_or(ModelError::NotTrained)?
            .predict(point, task)
    }

    fn is_trained(&self) -> bool {
        self.state.is_some()
    }
}

/// Standard GP for single-task data. Multi-task data is rejected; use
/// [`LcmModel`] for it.
#[derive(Debug)]
pub struct SingleTaskModel {
    coordinator: RestartCoordinator,
    options: TuningOptions,
    state: Option<TrainedState>,
}

impl SingleTaskModel {
    pub fn new(options: &TuningOptions) -> Self {
        Self::with_engine(build_engine(options.engine), options)
    }

    pub fn with_engine(engine: Arc<dyn RegressionEngine>, options: &TuningOptions) -> Self {
        Self {
            coordinator: RestartCoordinator::from_options(engine, options),
            options: options.clone(),
            state: None,
        }
    }

    pub fn summary(&self) -> Option<&TrainingSummary> {
        self.state.as_ref().map(|s| &s.summary)
    }
}

impl SurrogateModel for SingleTaskModel {
    fn name(&self) -> &'static str {
        "single_task"
    }

    fn train(&mut self, data: &Dataset) -> TuneResult<()> {
        match data.task_count() {
            0 => {
                return Err(DatasetError::Incomplete {
                    message: "single-task model needs one task".into(),
                }
                .into())
            }
            1 => {}
            n => {
                return Err(validation_error!(
                    "single-task model cannot train on {n} tasks; use the lcm model"
                ))
            }
        }
        let previous = self.state.take();
        self.state = Some(fit_state(&self.coordinator, &self.options, data, 1, previous)?);
        Ok(())
    }

    fn update(&mut self, delta: &Dataset, retrain: bool) -> TuneResult<()> {
        if !retrain {
            debug!("no incremental update for single-task model, retraining");
        }
        let data = merged_data(self.state.as_ref(), delta)?;
        self.train(&data)
    }

    fn predict(&self, point: &[f64], task: usize) -> TuneResult<Prediction> {
        self.state
            .as_ref()
            .ok_or(ModelError::NotTrained)?
            .predict(point, task)
    }

    fn is_trained(&self) -> bool {
        self.state.is_some()
    }
}

/// Construct the surrogate named by `options.model`.
pub fn build_model(options: &TuningOptions) -> TuneResult<Box<dyn SurrogateModel>> {
    options.validate()?;
    Ok(match options.model {
        ModelKind::Lcm => Box::new(LcmModel::new(options)),
        ModelKind::SingleTask => Box::new(SingleTaskModel::new(options)),
    })
}
