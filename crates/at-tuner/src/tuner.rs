//! Multi-task active learning loop.

use std::sync::Arc;
use tracing::{info, warn};

use at_model::{build_model, SurrogateModel};
use at_types::{
    validation_error, Dataset, ModelKind, Problem, TuneError, TuneResult, TuningOptions,
};

use crate::collaborators::{Computer, LocalComputer, Transformer};
use crate::registry::{build_sampler, build_search};
use crate::status::TuningStatus;

/// Drives sampling, training, search and evaluation for one problem.
///
/// The held dataset is in user space between runs and in the normalized
/// space while a run is in progress.
pub struct Tuner {
    problem: Problem,
    options: TuningOptions,
    computer: Arc<dyn Computer>,
    data: Dataset,
    status: TuningStatus,
}

impl Tuner {
    pub fn new(problem: Problem, options: TuningOptions) -> TuneResult<Self> {
        options.validate()?;
        let status = TuningStatus::new(problem.name.clone());
        Ok(Self {
            problem,
            options,
            computer: Arc::new(LocalComputer::new()),
            data: Dataset::new(),
            status,
        })
    }

    pub fn with_computer(mut self, computer: Arc<dyn Computer>) -> Self {
        self.computer = computer;
        self
    }

    /// Start from previously collected data, given in user space.
    pub fn with_data(mut self, data: Dataset) -> Self {
        self.data = data;
        self
    }

    pub fn data(&self) -> &Dataset {
        &self.data
    }

    pub fn status(&self) -> &TuningStatus {
        &self.status
    }

    pub fn options(&self) -> &TuningOptions {
        &self.options
    }

    /// Grow every task to `ns` samples.
    ///
    /// `ni` tasks are sampled when the dataset has none; `ns1` initial
    /// parameter vectors per task are sampled when it has no samples,
    /// defaulting to `min(ns - 1, 3 * parameter_dim)`. Returns a copy of the
    /// final dataset in user space and the last trained model.
    pub fn run(
        &mut self,
        ns: usize,
        ni: Option<usize>,
        ns1: Option<usize>,
    ) -> TuneResult<(Dataset, Box<dyn SurrogateModel>)> {
        self.status.mark_running(ns);
        info!(
            problem = %self.problem.name,
            budget = ns,
            model = ?self.options.model,
            execution = ?self.options.execution,
            "tuning run started"
        );

        self.normalize();
        let outcome = self.run_normalized(ns, ni, ns1);
        self.denormalize();

        match outcome {
            Ok(model) => {
                self.status.mark_completed();
                info!(
                    rounds = self.status.rounds_completed,
                    samples = self.status.samples_evaluated,
                    "tuning run completed"
                );
                Ok((self.data.clone(), model))
            }
            Err(e) => {
                warn!(error = %e, "tuning run failed");
                self.status.mark_failed(e.to_string());
                Err(e)
            }
        }
    }

    fn run_normalized(
        &mut self,
        ns: usize,
        ni: Option<usize>,
        ns1: Option<usize>,
    ) -> TuneResult<Box<dyn SurrogateModel>> {
        let problem = &self.problem;
        let computer = self.computer.as_ref();
        let task_check = |task: &[f64]| computer.evaluate_constraints(problem, task, None);
        let parameter_check =
            |task: &[f64], x: &[f64]| computer.evaluate_constraints(problem, task, Some(x));

        let sampler = build_sampler(&self.options);
        if !self.data.has_tasks() {
            let ni = ni.ok_or_else(|| {
                TuneError::MissingInput(
                    "number of tasks (NI) is required when no tasks exist".into(),
                )
            })?;
            let tasks = sampler.sample_tasks(ni, &problem.input_space, &task_check)?;
            self.data.set_tasks(tasks)?;
        }
        if self.options.model == ModelKind::SingleTask && self.data.task_count() > 1 {
            return Err(validation_error!(
                "single-task model cannot tune {} tasks; use the lcm model",
                self.data.task_count()
            ));
        }

        if !self.data.has_parameters() {
            let ns1 =
                ns1.unwrap_or_else(|| (3 * problem.parameter_dim()).min(ns.saturating_sub(1)));
            if ns1 == 0 {
                return Err(validation_error!(
                    "budget {ns} leaves no room for initial samples"
                ));
            }
            let parameters = sampler.sample_parameters(
                ns1,
                self.data.tasks(),
                &problem.parameter_space,
                &parameter_check,
            )?;
            self.data.set_parameters(parameters)?;
        }

        if !self.data.has_objectives() {
            let objectives =
                computer.evaluate(problem, self.data.tasks(), self.data.parameters())?;
            self.data.set_objectives(objectives)?;
            for (task, (xs, ys)) in self
                .data
                .parameters()
                .iter()
                .zip(self.data.objectives())
                .enumerate()
            {
                for (x, &y) in xs.iter().zip(ys) {
                    self.status
                        .record_sample(task, &problem.parameter_space.denormalize(x), y);
                }
            }
        }
        self.data.validate()?;

        let rounds = ns.saturating_sub(self.data.sample_count(0));
        info!(
            tasks = self.data.task_count(),
            initial = self.data.sample_count(0),
            rounds,
            "initial design ready"
        );

        let mut model = build_model(&self.options)?;
        let search = build_search(&self.options, problem.parameter_dim());
        for round in 0..rounds {
            model.train(&self.data)?;
            let candidates = search.propose(&self.data, model.as_ref(), &parameter_check)?;

            let tasks = self.data.tasks().to_vec();
            let parameters: Vec<_> = candidates.into_iter().map(|x| vec![x]).collect();
            let objectives = computer.evaluate(problem, &tasks, &parameters)?;
            for (task, (xs, ys)) in parameters.iter().zip(&objectives).enumerate() {
                for (x, &y) in xs.iter().zip(ys) {
                    self.status
                        .record_sample(task, &problem.parameter_space.denormalize(x), y);
                }
            }

            let delta = Dataset::from_parts(tasks, parameters, objectives)?;
            self.data.merge(&delta)?;
            self.status.record_round();
            info!(
                round = round + 1,
                of = rounds,
                samples = self.data.sample_count(0),
                "round complete"
            );
        }

        if !model.is_trained() {
            model.train(&self.data)?;
        }
        Ok(model)
    }

    fn normalize(&mut self) {
        let input: &dyn Transformer = &self.problem.input_space;
        let params: &dyn Transformer = &self.problem.parameter_space;
        self.data
            .map_points(|t| input.normalize(t), |x| params.normalize(x));
    }

    fn denormalize(&mut self) {
        let input: &dyn Transformer = &self.problem.input_space;
        let params: &dyn Transformer = &self.problem.parameter_space;
        self.data
            .map_points(|t| input.denormalize(t), |x| params.denormalize(x));
    }
}

impl std::fmt::Debug for Tuner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tuner")
            .field("problem", &self.problem)
            .field("options", &self.options)
            .field("samples", &self.data.total_samples())
            .field("status", &self.status.state)
            .finish()
    }
}
