//! Random-restart hyperparameter optimization, fanned out over one of three
//! execution modes, followed by selection of the best restart.

use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use at_types::{
    internal_error, Dataset, ExecutionMode, ModelError, RestartFailure, TuneResult, TuningOptions,
};

use crate::engine::{FittedRegression, NoiseTerm, RegressionEngine};
use crate::kernel::LcmKernel;
use crate::pool::{MemberOutput, PoolConfig, WorkerPool};
use crate::restart::{run_restart, run_restarts};
use crate::wire::{
    partition, ModelDefinition, RestartBundle, RestartOutcome, RestartResult, WorkerReply,
};

/// Outcome of one `optimize` call.
#[derive(Debug, Clone)]
pub struct Selection {
    pub best: RestartResult,
    /// Successful restarts, in gather order.
    pub results: Vec<RestartResult>,
    pub failures: Vec<RestartFailure>,
}

/// Joint regression assembled around the selected hyperparameters.
#[derive(Debug, Clone)]
pub struct AssembledModel {
    pub kernel: LcmKernel,
    pub noise: Vec<NoiseTerm>,
    pub fitted: Arc<dyn FittedRegression>,
}

/// Runs restarts in the configured execution mode and picks the winner.
#[derive(Clone)]
pub struct RestartCoordinator {
    engine: Arc<dyn RegressionEngine>,
    mode: ExecutionMode,
    pool: PoolConfig,
}

impl RestartCoordinator {
    pub fn new(engine: Arc<dyn RegressionEngine>, mode: ExecutionMode, pool: PoolConfig) -> Self {
        Self { engine, mode, pool }
    }

    pub fn from_options(engine: Arc<dyn RegressionEngine>, options: &TuningOptions) -> Self {
        Self::new(engine, options.execution, PoolConfig::from_options(options))
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn engine(&self) -> &Arc<dyn RegressionEngine> {
        &self.engine
    }

    /// Run restarts `0..restarts` and return every outcome.
    ///
    /// Sequential and shared-memory modes keep submission order; distributed
    /// mode concatenates the members' partial lists in rank order.
    pub fn gather(
        &self,
        definition: &ModelDefinition,
        data: &Dataset,
        restarts: usize,
    ) -> TuneResult<Vec<RestartOutcome>> {
        let indices: Vec<usize> = (0..restarts).collect();
        match self.mode {
            ExecutionMode::Sequential => {
                Ok(run_restarts(self.engine.as_ref(), definition, data, &indices))
            }
            ExecutionMode::SharedMemory => self.gather_shared(definition, data, &indices),
            ExecutionMode::Distributed => self.gather_distributed(definition, data, &indices),
        }
    }

    fn gather_shared(
        &self,
        definition: &ModelDefinition,
        data: &Dataset,
        indices: &[usize],
    ) -> TuneResult<Vec<RestartOutcome>> {
        let threads = self.pool.threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| internal_error!("Failed to build thread pool: {e}"))?;

        debug!(threads, restarts = indices.len(), "shared-memory restart fan-out");
        let engine = self.engine.as_ref();
        Ok(pool.install(|| {
            indices
                .par_iter()
                .map(|&restart| run_restart(engine, definition, data, restart))
                .collect()
        }))
    }

    fn gather_distributed(
        &self,
        definition: &ModelDefinition,
        data: &Dataset,
        indices: &[usize],
    ) -> TuneResult<Vec<RestartOutcome>> {
        let size = self.pool.members_for(indices.len());
        let call_id = Uuid::new_v4();
        let parts = partition(indices, size);

        // every bundle is serialized before any worker exists
        let payloads = parts
            .iter()
            .enumerate()
            .map(|(rank, subset)| {
                serde_json::to_string(&RestartBundle {
                    call_id,
                    rank,
                    size,
                    definition: definition.clone(),
                    dataset: data.clone(),
                    restarts: subset.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut pool = WorkerPool::spawn(&self.pool, size)?;
        pool.broadcast(&payloads)?;
        let outputs = pool.gather();
        info!(%call_id, size, restarts = indices.len(), "distributed restarts gathered");

        let mut outcomes = Vec::with_capacity(indices.len());
        for output in outputs {
            let subset = &parts[output.rank];
            outcomes.extend(decode_reply(output, call_id, subset, definition));
        }
        Ok(outcomes)
    }

    /// Run `restarts` restarts and select the one with the lowest negative
    /// log-likelihood. Individual failures are absorbed; the call fails only
    /// when every restart failed.
    pub fn optimize(
        &self,
        definition: &ModelDefinition,
        data: &Dataset,
        restarts: usize,
    ) -> TuneResult<Selection> {
        if restarts == 0 {
            return Err(ModelError::NoRestarts.into());
        }

        let outcomes = self.gather(definition, data, restarts)?;
        let mut results = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(result) => results.push(result),
                Err(failure) => failures.push(failure),
            }
        }

        let best = match select_best(&results) {
            Some(best) => best.clone(),
            None => {
                warn!(restarts, mode = ?self.mode, "every restart failed");
                return Err(ModelError::TrainingFailed {
                    attempted: restarts,
                    failures,
                }
                .into());
            }
        };

        info!(
            mode = ?self.mode,
            restarts,
            failed = failures.len(),
            best_restart = best.restart,
            nll = best.nll,
            "restart selection complete"
        );
        Ok(Selection {
            best,
            results,
            failures,
        })
    }

    /// Fix the kernel at the selected hyperparameters, attach one noise term
    /// per task, and fit the joint regression once.
    pub fn assemble(
        &self,
        best: &RestartResult,
        definition: &ModelDefinition,
        data: &Dataset,
    ) -> TuneResult<AssembledModel> {
        let kernel =
            LcmKernel::new(definition.kernel, best.params.clone()).map_err(ModelError::from)?;
        let noise: Vec<NoiseTerm> = kernel
            .noise_variances()
            .into_iter()
            .enumerate()
            .map(|(task, variance)| NoiseTerm { task, variance })
            .collect();

        let fitted = self
            .engine
            .fit_joint(
                &kernel,
                data.parameters(),
                data.objectives(),
                &noise,
                &definition.fit,
            )
            .map_err(ModelError::from)?;

        Ok(AssembledModel {
            kernel,
            noise,
            fitted,
        })
    }
}

impl std::fmt::Debug for RestartCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestartCoordinator")
            .field("engine", &self.engine.name())
            .field("mode", &self.mode)
            .field("pool", &self.pool)
            .finish()
    }
}

/// The result with the minimum nll; on ties the earliest one wins.
pub fn select_best(results: &[RestartResult]) -> Option<&RestartResult> {
    let mut best: Option<&RestartResult> = None;
    for result in results {
        match best {
            Some(current) if result.nll >= current.nll => {}
            _ => best = Some(result),
        }
    }
    best
}

/// Turn one member's raw output into outcomes for its assigned restarts.
fn decode_reply(
    output: MemberOutput,
    call_id: Uuid,
    subset: &[usize],
    definition: &ModelDefinition,
) -> Vec<RestartOutcome> {
    let rank = output.rank;
    let reply = output
        .stdout
        .and_then(|bytes| {
            serde_json::from_slice::<WorkerReply>(&bytes).map_err(|e| e.to_string())
        })
        .and_then(|reply| {
            if reply.call_id != call_id || reply.rank != rank {
                Err(format!("reply for call {} rank {}", reply.call_id, reply.rank))
            } else if reply.outcomes.len() != subset.len() {
                Err(format!(
                    "{} outcomes for {} restarts",
                    reply.outcomes.len(),
                    subset.len()
                ))
            } else {
                Ok(reply)
            }
        });

    match reply {
        Ok(reply) => reply.outcomes,
        Err(message) => {
            let status = output
                .status
                .map(|status| status.to_string())
                .unwrap_or_else(|| "unknown status".into());
            warn!(rank, %status, error = %message, "worker produced no usable reply");
            subset
                .iter()
                .map(|&restart| {
                    Err(RestartFailure {
                        restart,
                        seed: definition.seed_policy.seed_for(restart),
                        reason: format!("worker {rank} failed ({status}): {message}"),
                    })
                })
                .collect()
        }
    }
}
