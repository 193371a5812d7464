//! Pool member side of distributed restart optimization.

use std::io::{Read, Write};
use tracing::info;

use at_types::TuneResult;

use crate::engine::build_engine;
use crate::restart::run_restarts;
use crate::wire::{RestartBundle, WorkerReply};

/// Read one [`RestartBundle`] from `input`, run its restarts and write the
/// [`WorkerReply`] to `output`. Returns the number of restarts processed.
pub fn serve<R: Read, W: Write>(mut input: R, mut output: W) -> TuneResult<usize> {
    let mut buffer = Vec::new();
    input.read_to_end(&mut buffer)?;
    let bundle: RestartBundle = serde_json::from_slice(&buffer)?;

    info!(
        call_id = %bundle.call_id,
        rank = bundle.rank,
        size = bundle.size,
        restarts = ?bundle.restarts,
        "worker received bundle"
    );

    let engine = build_engine(bundle.definition.engine);
    let outcomes = run_restarts(
        engine.as_ref(),
        &bundle.definition,
        &bundle.dataset,
        &bundle.restarts,
    );

    let reply = WorkerReply {
        call_id: bundle.call_id,
        rank: bundle.rank,
        outcomes,
    };
    serde_json::to_writer(&mut output, &reply)?;
    output.flush()?;
    Ok(reply.outcomes.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FitOptions;
    use crate::kernel::KernelSpec;
    use crate::restart::run_restart;
    use crate::wire::{ModelDefinition, SeedPolicy};
    use at_types::{Dataset, EngineKind, TuneError};
    use uuid::Uuid;

    fn bundle(restarts: Vec<usize>) -> RestartBundle {
        let xs: Vec<Vec<f64>> = (0..5).map(|i| vec![i as f64 / 4.0]).collect();
        let ys: Vec<f64> = xs.iter().map(|x| (x[0] - 0.3).powi(2)).collect();
        RestartBundle {
            call_id: Uuid::new_v4(),
            rank: 1,
            size: 2,
            definition: ModelDefinition {
                engine: EngineKind::Dense,
                kernel: KernelSpec::new(1, 1, 1),
                warm_start: None,
                seed_policy: SeedPolicy::new(Some(4), 2),
                fit: FitOptions {
                    max_iters: 100,
                    inducing: None,
                },
            },
            dataset: Dataset::from_parts(vec![vec![0.0]], vec![xs], vec![ys]).unwrap(),
            restarts,
        }
    }

    #[test]
    fn serve_runs_assigned_restarts() {
        let bundle = bundle(vec![1, 3]);
        let input = serde_json::to_vec(&bundle).unwrap();
        let mut output = Vec::new();

        let processed = serve(input.as_slice(), &mut output).unwrap();
        assert_eq!(processed, 2);

        let reply: WorkerReply = serde_json::from_slice(&output).unwrap();
        assert_eq!(reply.call_id, bundle.call_id);
        assert_eq!(reply.rank, 1);

        let engine = build_engine(EngineKind::Dense);
        let local = run_restart(engine.as_ref(), &bundle.definition, &bundle.dataset, 3);
        assert_eq!(reply.outcomes[1], local);
    }

    #[test]
    fn serve_rejects_malformed_bundle() {
        let mut output = Vec::new();
        let err = serve(&b"{\"rank\": 0}"[..], &mut output).unwrap_err();
        assert!(matches!(err, TuneError::Serialization(_)));
        assert!(output.is_empty());
    }
}
