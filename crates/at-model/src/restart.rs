//! Local optimization of one restart, identical in every execution mode.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

use at_types::{Dataset, RestartFailure};

use crate::engine::RegressionEngine;
use crate::kernel::LcmKernel;
use crate::wire::{ModelDefinition, RestartOutcome, RestartResult};

/// Run restart `restart`: seed the generator, draw a fresh kernel (or warm
/// start restart 0), and optimize it to convergence.
pub fn run_restart(
    engine: &dyn RegressionEngine,
    definition: &ModelDefinition,
    data: &Dataset,
    restart: usize,
) -> RestartOutcome {
    let seed = definition.seed_policy.seed_for(restart);
    let failure = |reason: String| RestartFailure {
        restart,
        seed,
        reason,
    };

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut kernel = LcmKernel::random(definition.kernel, &mut rng);
    if restart == 0 {
        if let Some(previous) = &definition.warm_start {
            kernel = LcmKernel::new(definition.kernel, previous.clone())
                .map_err(|e| failure(e.to_string()))?;
        }
    }

    let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
        engine.optimize_kernel(&kernel, data.parameters(), data.objectives(), &definition.fit)
    }));

    let outcome = match attempt {
        Ok(Ok(fit)) if fit.nll.is_finite() => Ok(RestartResult {
            restart,
            seed,
            params: fit.params,
            nll: fit.nll,
            iterations: fit.iterations,
        }),
        Ok(Ok(fit)) => Err(failure(format!("non-finite likelihood {}", fit.nll))),
        Ok(Err(e)) => Err(failure(e.to_string())),
        Err(payload) => Err(failure(panic_message(payload.as_ref()))),
    };

    match &outcome {
        Ok(result) => debug!(
            restart,
            seed,
            nll = result.nll,
            iterations = result.iterations,
            "restart converged"
        ),
        Err(e) => warn!(restart, seed, reason = %e.reason, "restart failed"),
    }
    outcome
}

/// Run `restarts` one after another, preserving their order.
pub fn run_restarts(
    engine: &dyn RegressionEngine,
    definition: &ModelDefinition,
    data: &Dataset,
    restarts: &[usize],
) -> Vec<RestartOutcome> {
    restarts
        .iter()
        .map(|&restart| run_restart(engine, definition, data, restart))
        .collect()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{FitOptions, FittedRegression, KernelFit, NoiseTerm};
    use crate::kernel::KernelSpec;
    use crate::wire::SeedPolicy;
    use at_types::{EngineError, EngineKind, Point};
    use std::sync::Arc;

    /// Echoes the starting parameters; the nll is their sum.
    struct EchoEngine;

    impl RegressionEngine for EchoEngine {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn optimize_kernel(
            &self,
            start: &LcmKernel,
            _x: &[Vec<Point>],
            _y: &[Vec<f64>],
            _options: &FitOptions,
        ) -> Result<KernelFit, EngineError> {
            if start.params()[0] > 100.0 {
                panic!("lengthscale exploded");
            }
            Ok(KernelFit {
                params: start.params().to_vec(),
                nll: start.params().iter().sum(),
                iterations: 1,
            })
        }

        fn fit_joint(
            &self,
            _kernel: &LcmKernel,
            _x: &[Vec<Point>],
            _y: &[Vec<f64>],
            _noise: &[NoiseTerm],
            _options: &FitOptions,
        ) -> Result<Arc<dyn FittedRegression>, EngineError> {
            Err(EngineError::NoData)
        }
    }

    fn definition(warm_start: Option<Vec<f64>>) -> ModelDefinition {
        ModelDefinition {
            engine: EngineKind::Dense,
            kernel: KernelSpec::new(1, 1, 1),
            warm_start,
            seed_policy: SeedPolicy::new(Some(5), 2),
            fit: FitOptions::default(),
        }
    }

    #[test]
    fn restart_is_seeded_by_policy() {
        let def = definition(None);
        let data = Dataset::new();
        let result = run_restart(&EchoEngine, &def, &data, 3).unwrap();
        assert_eq!(result.seed, 13);

        let mut rng = ChaCha8Rng::seed_from_u64(13);
        let expected = LcmKernel::random(def.kernel, &mut rng);
        assert_eq!(result.params, expected.params());
        assert_eq!(run_restart(&EchoEngine, &def, &data, 3).unwrap(), result);
    }

    #[test]
    fn warm_start_applies_to_restart_zero_only() {
        let warm = vec![0.5, 0.5, -1.0, -5.0];
        let def = definition(Some(warm.clone()));
        let data = Dataset::new();
        assert_eq!(run_restart(&EchoEngine, &def, &data, 0).unwrap().params, warm);
        assert_ne!(run_restart(&EchoEngine, &def, &data, 1).unwrap().params, warm);
    }

    #[test]
    fn panics_become_restart_failures() {
        let def = definition(Some(vec![500.0, 0.0, 0.0, 0.0]));
        let outcomes = run_restarts(&EchoEngine, &def, &Dataset::new(), &[0, 1]);
        let failure = outcomes[0].as_ref().unwrap_err();
        assert_eq!(failure.restart, 0);
        assert!(failure.reason.contains("lengthscale exploded"));
        assert!(outcomes[1].is_ok());
    }

    #[test]
    fn malformed_warm_start_is_a_restart_failure() {
        let def = definition(Some(vec![0.0]));
        let failure = run_restart(&EchoEngine, &def, &Dataset::new(), 0).unwrap_err();
        assert!(failure.reason.contains("expects 4"));
    }
}
